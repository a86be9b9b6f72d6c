//! `rollcall verdict`: today's attendance ratio and eligibility for a classroom.

use anyhow::{bail, Result};
use rollcall_client::ApiClient;
use rollcall_core::aggregate::meets_minimum;
use rollcall_core::services::ClassroomDataService;
use rollcall_core::{build_report, AttendanceReport};

use crate::config::Config;
use crate::prompt::interruptible;

pub struct Options {
    pub watch: bool,
    pub json: bool,
    /// Check a server-reported percentage against the classroom minimum.
    pub percentage: Option<u32>,
}

pub async fn run(
    config: &Config,
    client: &ApiClient,
    classroom_id: &str,
    options: Options,
) -> Result<()> {
    if !options.watch {
        return report_once(client, classroom_id, &options).await;
    }

    let mut interval = tokio::time::interval(config.poll_interval());
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match interruptible(report_once(client, classroom_id, &options)).await {
                    None => return Ok(()),
                    Some(Err(e)) => {
                        tracing::warn!(classroom = classroom_id, error = %e, "verdict refresh failed");
                        eprintln!("error: {e:#}");
                    }
                    Some(Ok(())) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn report_once(client: &ApiClient, classroom_id: &str, options: &Options) -> Result<()> {
    let service: &dyn ClassroomDataService = client;
    let Some(classroom) = service.classroom(classroom_id).await? else {
        bail!("classroom {classroom_id} not found");
    };
    let records = service.attendance_today(classroom_id).await?;
    let report = build_report(&classroom, &records);

    if options.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print(&report);
    }

    if let Some(percentage) = options.percentage {
        println!(
            "Reported {percentage}%: {}",
            eligibility(meets_minimum(percentage, report.min_attendance))
        );
    }
    Ok(())
}

pub fn print(report: &AttendanceReport) {
    println!("{}", summary(report));
}

fn summary(report: &AttendanceReport) -> String {
    let v = &report.verdict;
    let subject = report.subject_name.as_deref().unwrap_or(&report.classroom_id);
    format!(
        "{subject}: {}/{} present ({}%), minimum {}%: {}",
        v.present_count,
        v.roster_size,
        v.percentage,
        report.min_attendance,
        eligibility(v.eligible)
    )
}

fn eligibility(eligible: bool) -> &'static str {
    if eligible {
        "eligible"
    } else {
        "not eligible"
    }
}
