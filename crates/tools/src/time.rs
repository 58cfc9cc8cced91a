//! Time tools: current time, date offsets and calendar details.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Local, TimeZone, Timelike};
use planwright_core::error::ToolError;
use planwright_core::tool::{Tool, ToolContract, ToolInput, ToolOutput};

const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn read_only_contract(schema: serde_json::Value) -> ToolContract {
    ToolContract::new(schema).auto_run(true).retry_safe(true).timeout_secs(5)
}

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current local date and time (YYYY-MM-DD HH:MM:SS)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn contract(&self) -> ToolContract {
        read_only_contract(self.parameters_schema())
    }

    async fn invoke(&self, _input: ToolInput) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(Local::now().format(FORMAT).to_string()))
    }
}

pub struct DateOffsetTool;

#[async_trait]
impl Tool for DateOffsetTool {
    fn name(&self) -> &str {
        "date_offset"
    }

    fn description(&self) -> &str {
        "Compute the date and time a number of days from now. Negative values go back in time."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "days": {
                    "type": "integer",
                    "description": "Days to add; negative for the past"
                }
            },
            "required": ["days"]
        })
    }

    fn contract(&self) -> ToolContract {
        read_only_contract(self.parameters_schema())
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let days = parse_days(&input.arguments["days"])?;
        Ok(ToolOutput::text(offset_from(Local::now(), days)?))
    }
}

/// Accepts an integer or a numeric string.
fn parse_days(value: &serde_json::Value) -> Result<i64, ToolError> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| {
            ToolError::InvalidArguments(format!("'days' must be an integer, got {value}"))
        })
}

fn offset_from<Tz: TimeZone>(now: DateTime<Tz>, days: i64) -> Result<String, ToolError>
where
    Tz::Offset: std::fmt::Display,
{
    let delta = Duration::try_days(days)
        .ok_or_else(|| ToolError::InvalidArguments(format!("{days} days is out of range")))?;
    now.checked_add_signed(delta)
        .map(|t| t.format(FORMAT).to_string())
        .ok_or_else(|| ToolError::InvalidArguments(format!("{days} days is out of range")))
}

pub struct TimeInfoTool;

#[async_trait]
impl Tool for TimeInfoTool {
    fn name(&self) -> &str {
        "time_info"
    }

    fn description(&self) -> &str {
        "Get detailed calendar information about now: date, time, weekday, timestamp and components."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn contract(&self) -> ToolContract {
        read_only_contract(self.parameters_schema())
    }

    async fn invoke(&self, _input: ToolInput) -> Result<ToolOutput, ToolError> {
        let info = time_info(Local::now());
        let output = serde_json::to_string_pretty(&info).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "time_info".into(),
            reason: e.to_string(),
        })?;
        let summary = format!(
            "{} ({})",
            info["current_time"].as_str().unwrap_or_default(),
            info["weekday"].as_str().unwrap_or_default()
        );
        Ok(ToolOutput::text(output).with_summary(summary).with_data(info))
    }
}

fn time_info<Tz: TimeZone>(now: DateTime<Tz>) -> serde_json::Value
where
    Tz::Offset: std::fmt::Display,
{
    serde_json::json!({
        "current_time": now.format(FORMAT).to_string(),
        "date": now.format("%Y-%m-%d").to_string(),
        "time": now.format("%H:%M:%S").to_string(),
        "weekday": now.format("%A").to_string(),
        "timestamp": now.timestamp(),
        "year": now.year(),
        "month": now.month(),
        "day": now.day(),
        "hour": now.hour(),
        "minute": now.minute(),
        "second": now.second(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fixed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 28, 9, 30, 0).unwrap()
    }

    #[test]
    fn offset_crosses_leap_day() {
        assert_eq!(offset_from(fixed(), 1).unwrap(), "2024-02-29 09:30:00");
        assert_eq!(offset_from(fixed(), -28).unwrap(), "2024-01-31 09:30:00");
    }

    #[test]
    fn days_accept_numeric_strings() {
        assert_eq!(parse_days(&serde_json::json!("7")).unwrap(), 7);
        assert_eq!(parse_days(&serde_json::json!(-3)).unwrap(), -3);
        assert!(parse_days(&serde_json::json!("soon")).is_err());
    }

    #[test]
    fn info_has_components() {
        let info = time_info(fixed());
        assert_eq!(info["date"], "2024-02-28");
        assert_eq!(info["weekday"], "Wednesday");
        assert_eq!(info["month"], 2);
    }

    #[tokio::test]
    async fn current_time_format() {
        let out = CurrentTimeTool.invoke(ToolInput::default()).await.unwrap();
        assert_eq!(out.output.len(), "2024-02-28 09:30:00".len());
    }

    #[tokio::test]
    async fn date_offset_rejects_missing_days() {
        let err = DateOffsetTool.invoke(ToolInput::default()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
