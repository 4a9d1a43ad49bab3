//! Metrics queries against the Datadog v1 query API.

use crate::api::retry::{classify_status, classify_transport};
use crate::error::ToolFailure;
use crate::tools::core::{Tool, ToolArgs, ToolFuture, into_data, parse_tool_args};
use crate::tools::names;
use crate::tools::spec::ToolSpec;
use crate::tools::urlencoded;
use chrono::{DateTime, TimeDelta, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

pub const DEFAULT_SITE: &str = "datadoghq.com";
pub const DEFAULT_TIME_PERIOD: &str = "1h";
/// Points kept per series, most recent last.
pub const MAX_POINTS_PER_SERIES: usize = 20;
/// Longest window a single query may cover.
pub const MAX_TIME_PERIOD_DAYS: i64 = 30;

/// Typed arguments for `metrics_query`.
#[derive(Deserialize, JsonSchema)]
pub struct MetricsArgs {
    /// Datadog metric query, e.g. 'avg:system.cpu.user{*}' or just 'system.cpu.user'.
    pub metric_query: String,
    /// How far back to look: a number followed by m, h, d or w (default '1h').
    #[serde(default)]
    pub time_period: Option<String>,
}

/// API and application keys plus the Datadog site.
#[derive(Debug, Clone, Default)]
pub struct DatadogCredentials {
    pub api_key: Option<String>,
    pub app_key: Option<String>,
    /// Site domain, e.g. `datadoghq.com` or `datadoghq.eu`.
    pub site: Option<String>,
}

impl DatadogCredentials {
    pub fn is_complete(&self) -> bool {
        let present = |k: &Option<String>| k.as_deref().is_some_and(|k| !k.trim().is_empty());
        present(&self.api_key) && present(&self.app_key)
    }
}

/// The `metrics_query` tool.
pub struct MetricsTool {
    client: reqwest::Client,
    credentials: DatadogCredentials,
    endpoint: String,
}

impl MetricsTool {
    pub fn new(client: reqwest::Client, credentials: DatadogCredentials) -> Self {
        let site = credentials.site.as_deref().unwrap_or(DEFAULT_SITE);
        let endpoint = format!("https://api.{site}/api/v1/query");
        Self {
            client,
            credentials,
            endpoint,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn query(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Value, ToolFailure> {
        let (Some(api_key), Some(app_key)) = (&self.credentials.api_key, &self.credentials.app_key)
        else {
            return Err(ToolFailure::not_configured("Datadog API keys not configured"));
        };
        let url = format!(
            "{}?from={}&to={}&query={}",
            self.endpoint,
            start.timestamp(),
            end.timestamp(),
            urlencoded(query)
        );
        let resp = self
            .client
            .get(&url)
            .header("DD-API-KEY", api_key)
            .header("DD-APPLICATION-KEY", app_key)
            .send()
            .await
            .map_err(|e| classify_transport("Datadog", &e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| classify_transport("Datadog", &e))?;
        debug!("Datadog: HTTP {status} ({} bytes)", text.len());

        if !status.is_success() {
            return Err(classify_status("Datadog", status.as_u16(), &text));
        }
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| ToolFailure::transient(format!("Datadog returned invalid JSON: {e}")))?;
        if body["status"] == "error" {
            let reason = body["error"].as_str().unwrap_or("query rejected");
            return Err(ToolFailure::invalid_argument(format!(
                "Datadog rejected the query: {reason}"
            )));
        }
        Ok(body)
    }
}

impl Tool for MetricsTool {
    fn name(&self) -> &str {
        names::METRICS_QUERY
    }

    fn description(&self) -> String {
        ToolSpec::builder("Retrieve time-series metrics from Datadog for a metric query and time window")
            .when_to_use(
                "When the user asks about system or application metrics such as CPU, memory, \
                 request rates, latency, or error counts",
            )
            .when_not_to_use("When the user needs general information from the web")
            .example(
                "CPU usage over the last day",
                r#"metrics_query(metric_query="avg:system.cpu.user{*}", time_period="24h")"#,
            )
            .output_format(
                "JSON: {metric_query, time_range, series: [{metric, scope, points: [{timestamp, value}]}], total_series}",
            )
            .prefer_instead("documentation, tutorials, or news", names::WEB_SEARCH)
            .to_description()
    }

    fn parameters(&self) -> Value {
        crate::json_schema_for::<MetricsArgs>()
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    fn is_configured(&self) -> bool {
        self.credentials.is_complete()
    }

    fn invoke<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: MetricsArgs = parse_tool_args(arguments)?;
            let original = args.metric_query.trim();
            if original.is_empty() {
                return Err(ToolFailure::invalid_argument("metric_query must not be empty"));
            }
            let period_label = args
                .time_period
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .unwrap_or(DEFAULT_TIME_PERIOD);
            let period = parse_time_period(period_label)?;
            if !self.credentials.is_complete() {
                return Err(ToolFailure::not_configured("Datadog API keys not configured"));
            }

            let query = normalize_query(original);
            let end = Utc::now();
            let start = end - period;
            info!("Querying Datadog: {query} over {period_label}");

            let body = self.query(&query, start, end).await?;
            let series: Vec<Value> = body["series"]
                .as_array()
                .map(|s| s.iter().map(format_series).collect())
                .unwrap_or_default();

            let total_series = series.len();
            let mut data = into_data(json!({
                "metric_query": query,
                "original_query": original,
                "time_range": {
                    "start": start.to_rfc3339(),
                    "end": end.to_rfc3339(),
                    "period": period_label,
                },
                "series": series,
                "total_series": total_series,
            }));
            if total_series == 0 {
                data.insert(
                    "note".into(),
                    Value::from("No data returned. Check the metric name and scope."),
                );
            }
            Ok(data)
        })
    }
}

/// Parse `<n>m|h|d|w` into a duration.
pub fn parse_time_period(period: &str) -> Result<TimeDelta, ToolFailure> {
    let invalid = || {
        ToolFailure::invalid_argument(format!(
            "invalid time_period '{period}': use a number followed by m, h, d or w (e.g. '1h', '24h', '7d')"
        ))
    };
    let period_lc = period.trim().to_ascii_lowercase();
    let unit = period_lc.chars().last().ok_or_else(invalid)?;
    let amount: i64 = period_lc
        .strip_suffix(unit)
        .and_then(|n| n.parse().ok())
        .filter(|n| *n > 0)
        .ok_or_else(invalid)?;

    let delta = match unit {
        'm' => TimeDelta::try_minutes(amount),
        'h' => TimeDelta::try_hours(amount),
        'd' => TimeDelta::try_days(amount),
        'w' => TimeDelta::try_weeks(amount),
        _ => None,
    }
    .ok_or_else(invalid)?;

    if delta > TimeDelta::days(MAX_TIME_PERIOD_DAYS) {
        return Err(ToolFailure::invalid_argument(format!(
            "time_period '{period}' exceeds the {MAX_TIME_PERIOD_DAYS}-day limit"
        )));
    }
    Ok(delta)
}

/// Add a default aggregator and scope when the query omits them.
pub fn normalize_query(query: &str) -> String {
    let query = query.trim();
    let head = query.split('{').next().unwrap_or(query);
    let mut normalized = if head.contains(':') {
        query.to_string()
    } else {
        format!("avg:{query}")
    };
    if !normalized.contains('{') {
        normalized.push_str("{*}");
    }
    normalized
}

/// Reshape one API series, keeping only the most recent points.
pub fn format_series(series: &Value) -> Value {
    let pointlist = series["pointlist"].as_array().map(Vec::as_slice).unwrap_or_default();
    let skip = pointlist.len().saturating_sub(MAX_POINTS_PER_SERIES);
    let points: Vec<Value> = pointlist
        .iter()
        .skip(skip)
        .map(|p| {
            let timestamp = p[0]
                .as_f64()
                .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms as i64))
                .map(|t| t.to_rfc3339());
            json!({ "timestamp": timestamp, "value": p[1] })
        })
        .collect();

    let unit = series["unit"]
        .as_array()
        .and_then(|units| units.iter().find_map(|u| u["name"].as_str()));

    json!({
        "metric": series["metric"],
        "display_name": series["display_name"],
        "scope": series["scope"],
        "tags": series["tag_set"].as_array().cloned().unwrap_or_default(),
        "unit": unit,
        "points": points,
        "total_points": pointlist.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;

    fn tool(credentials: DatadogCredentials) -> MetricsTool {
        MetricsTool::new(reqwest::Client::new(), credentials)
    }

    fn full_credentials() -> DatadogCredentials {
        DatadogCredentials {
            api_key: Some("api".into()),
            app_key: Some("app".into()),
            site: None,
        }
    }

    #[test]
    fn time_periods() {
        assert_eq!(parse_time_period("1h").unwrap(), TimeDelta::hours(1));
        assert_eq!(parse_time_period("24H").unwrap(), TimeDelta::hours(24));
        assert_eq!(parse_time_period("7d").unwrap(), TimeDelta::days(7));
        assert_eq!(parse_time_period("30m").unwrap(), TimeDelta::minutes(30));
        assert_eq!(parse_time_period("2w").unwrap(), TimeDelta::weeks(2));

        for bad in ["", "h", "0h", "-1h", "1y", "abc", "90d"] {
            let err = parse_time_period(bad).unwrap_err();
            assert_eq!(err.kind, ToolErrorKind::InvalidArgument, "{bad}");
        }
    }

    #[test]
    fn queries_are_normalized() {
        assert_eq!(normalize_query("system.cpu.user"), "avg:system.cpu.user{*}");
        assert_eq!(normalize_query("max:system.load.1"), "max:system.load.1{*}");
        assert_eq!(
            normalize_query("system.cpu.user{host:web-1}"),
            "avg:system.cpu.user{host:web-1}"
        );
        assert_eq!(
            normalize_query(" sum:requests{env:prod} "),
            "sum:requests{env:prod}"
        );
    }

    #[test]
    fn series_keep_last_points() {
        let pointlist: Vec<Value> = (0..25)
            .map(|i| json!([1_700_000_000_000_i64 + i * 60_000, i as f64]))
            .collect();
        let series = json!({
            "metric": "system.cpu.user",
            "display_name": "system.cpu.user",
            "scope": "host:web-1",
            "tag_set": ["host:web-1"],
            "unit": [{"name": "percent"}, null],
            "pointlist": pointlist,
        });

        let formatted = format_series(&series);
        let points = formatted["points"].as_array().unwrap();
        assert_eq!(points.len(), MAX_POINTS_PER_SERIES);
        assert_eq!(points[0]["value"], 5.0);
        assert!(points[0]["timestamp"].as_str().unwrap().starts_with("2023-11-14"));
        assert_eq!(formatted["total_points"], 25);
        assert_eq!(formatted["unit"], "percent");
        assert_eq!(formatted["tags"][0], "host:web-1");
    }

    #[test]
    fn credential_status() {
        assert!(tool(full_credentials()).is_configured());
        assert!(tool(full_credentials()).requires_credentials());
        assert!(!tool(DatadogCredentials::default()).is_configured());
        let blank = DatadogCredentials {
            app_key: Some("  ".into()),
            ..full_credentials()
        };
        assert!(!tool(blank).is_configured());
    }

    #[tokio::test]
    async fn missing_keys_are_not_configured() {
        let args = into_data(json!({ "metric_query": "system.cpu.user" }));
        let err = tool(DatadogCredentials::default())
            .invoke(&args)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::NotConfigured);
        assert!(err.message.contains("not configured"));
    }

    #[tokio::test]
    async fn bad_arguments_fail_before_credentials() {
        let t = tool(DatadogCredentials::default());

        let empty = into_data(json!({ "metric_query": "  " }));
        assert_eq!(
            t.invoke(&empty).await.unwrap_err().kind,
            ToolErrorKind::InvalidArgument
        );

        let bad_period = into_data(json!({ "metric_query": "cpu", "time_period": "soon" }));
        assert_eq!(
            t.invoke(&bad_period).await.unwrap_err().kind,
            ToolErrorKind::InvalidArgument
        );
    }

    #[test]
    fn site_selects_endpoint() {
        let t = tool(DatadogCredentials {
            site: Some("datadoghq.eu".into()),
            ..full_credentials()
        });
        assert_eq!(t.endpoint, "https://api.datadoghq.eu/api/v1/query");
    }
}
