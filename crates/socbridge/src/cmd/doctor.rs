use serde::Serialize;
use socbridge_session::SessionConfig;
use socbridge_transport::{list_serial_ports_in, Connector, Transport};

use crate::cmd::{DoctorArgs, LinkArgs};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

/// Outcome of one probe. Only `Fail` changes the exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

impl CheckStatus {
    fn label(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warn => "WARN",
            CheckStatus::Info => "INFO",
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

impl DoctorOutput {
    fn from_checks(checks: Vec<CheckResult>) -> Self {
        let failed = checks.iter().any(|c| c.status == CheckStatus::Fail);
        Self {
            checks,
            overall: if failed { "fail" } else { "pass" },
        }
    }

    fn passed(&self) -> bool {
        self.overall == "pass"
    }
}

pub fn run(_args: DoctorArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let mut checks = vec![platform_transport_check(), compiled_features_check()];

    // Later probes need a usable link configuration.
    match link.session_config() {
        Ok(config) => {
            checks.push(config_check(link, &config));
            checks.push(serial_ports_check(link));
            checks.push(controller_check(&config));
        }
        Err(err) => checks.push(CheckResult::new("config", CheckStatus::Fail, err.message)),
    }

    let output = DoctorOutput::from_checks(checks);
    match format {
        OutputFormat::Json => print_json(&output),
        OutputFormat::Table => {
            let mut out = table(vec!["CHECK", "STATUS", "DETAIL"]);
            for c in &output.checks {
                out.add_row(vec![c.name.to_string(), c.status.label().to_string(), c.detail.clone()]);
            }
            println!("{out}");
        }
        OutputFormat::Pretty => {
            for c in &output.checks {
                println!("[{}] {}: {}", c.status.label(), c.name, c.detail);
            }
            println!("overall: {}", output.overall);
        }
        OutputFormat::Raw => println!("{}", output.overall),
    }

    Ok(if output.passed() { SUCCESS } else { HEALTH_CHECK_FAILED })
}

fn platform_transport_check() -> CheckResult {
    if cfg!(target_os = "linux") {
        CheckResult::new("platform_transport", CheckStatus::Pass, "serial, i2c and spi available")
    } else if cfg!(unix) {
        CheckResult::new("platform_transport", CheckStatus::Warn, "serial only; i2c and spi need Linux")
    } else {
        CheckResult::new("platform_transport", CheckStatus::Fail, "no link backend for this platform")
    }
}

fn compiled_features_check() -> CheckResult {
    let mut features = vec!["cli"];
    if cfg!(feature = "async") {
        features.push("async");
    }
    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}

fn config_check(link: &LinkArgs, config: &SessionConfig) -> CheckResult {
    let detail = format!(
        "{} link, protocol {}, timeout {}ms, {} write attempts",
        config.transport.name(),
        config.revision,
        config.response_timeout_ms,
        config.retry.total_attempts()
    );
    match &link.config {
        Some(path) => CheckResult::new("config", CheckStatus::Pass, format!("{}: {detail}", path.display())),
        None => CheckResult::new("config", CheckStatus::Info, format!("defaults: {detail}")),
    }
}

fn serial_ports_check(link: &LinkArgs) -> CheckResult {
    let (root, signature) = match link.serial_probe() {
        Ok(probe) => probe,
        Err(err) => return CheckResult::new("serial_ports", CheckStatus::Fail, err.message),
    };
    let ports = list_serial_ports_in(&root, &signature);
    let matched = ports.iter().filter(|p| p.matched).count();
    let status = if matched > 0 {
        CheckStatus::Pass
    } else {
        CheckStatus::Info
    };
    CheckResult::new(
        "serial_ports",
        status,
        format!("{} ports under {}, {matched} controller(s)", ports.len(), root.display()),
    )
}

/// Looks for the configured device without opening it.
fn controller_check(config: &SessionConfig) -> CheckResult {
    match config.transport.discover() {
        Some(handle) => CheckResult::new("controller", CheckStatus::Pass, format!("found {handle}")),
        None => CheckResult::new(
            "controller",
            CheckStatus::Warn,
            match &config.transport {
                Transport::Serial(_) => "no matching serial controller".to_string(),
                Transport::I2c(i2c) => format!("{} not present", i2c.device_path().display()),
                Transport::Spi(spi) => format!("{} not present", spi.device.display()),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_output_has_overall_status() {
        let output = DoctorOutput::from_checks(vec![
            CheckResult::new("x", CheckStatus::Pass, "ok"),
            CheckResult::new("y", CheckStatus::Warn, "degraded"),
        ]);
        assert!(output.passed());
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[test]
    fn missing_spi_device_is_a_warning() {
        let config = SessionConfig {
            transport: Transport::Spi(socbridge_transport::SpiConfig {
                device: "/dev/socbridge-missing-spidev".into(),
                ..Default::default()
            }),
            ..SessionConfig::default()
        };
        let check = controller_check(&config);
        assert!(matches!(check.status, CheckStatus::Warn));
        assert!(check.detail.contains("socbridge-missing-spidev"));
    }

    #[test]
    fn any_failure_fails_overall() {
        let output = DoctorOutput::from_checks(vec![
            CheckResult::new("x", CheckStatus::Pass, "ok"),
            CheckResult::new("config", CheckStatus::Fail, "unreadable"),
        ]);
        assert!(!output.passed());
        assert_eq!(output.overall, "fail");
    }
}
