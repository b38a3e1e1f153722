//! Minimal WHOIS client used only to estimate domain age. One TCP/43 query
//! to the IANA root to find the registry server, one query to the registry.

use chrono::{NaiveDate, Utc};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const WHOIS_PORT: u16 = 43;
const QUERY_TIMEOUT: Duration = Duration::from_secs(8);

/// Look up the age of a registered domain in days. `None` when the lookup
/// fails or the registry response carries no recognizable creation date.
pub async fn domain_age_days(domain: &str) -> Option<i64> {
    let root = raw_query("whois.iana.org", domain).await?;
    let server = root
        .lines()
        .find_map(|l| l.strip_prefix("refer:").map(|v| v.trim().to_string()))
        .unwrap_or_else(|| "whois.iana.org".to_string());

    let response = if server == "whois.iana.org" {
        root
    } else {
        raw_query(&server, domain).await?
    };

    let created = parse_creation_date(&response)?;
    let age = (Utc::now().date_naive() - created).num_days();
    debug!(domain, age_days = age, "resolved domain age via whois");
    Some(age)
}

async fn raw_query(server: &str, query: &str) -> Option<String> {
    let fut = async {
        let mut stream = TcpStream::connect((server, WHOIS_PORT)).await.ok()?;
        stream
            .write_all(format!("{query}\r\n").as_bytes())
            .await
            .ok()?;
        let mut buf = Vec::with_capacity(4096);
        stream.read_to_end(&mut buf).await.ok()?;
        Some(String::from_utf8_lossy(&buf).into_owned())
    };
    tokio::time::timeout(QUERY_TIMEOUT, fut).await.ok().flatten()
}

/// Registries disagree on the label; try the common spellings in order.
fn parse_creation_date(response: &str) -> Option<NaiveDate> {
    const LABELS: [&str; 4] = ["creation date:", "created:", "registered:", "registration date:"];
    for line in response.lines() {
        let lower = line.trim().to_lowercase();
        for label in LABELS {
            if let Some(rest) = lower.strip_prefix(label) {
                if let Some(date) = parse_date_value(rest.trim()) {
                    return Some(date);
                }
            }
        }
    }
    None
}

fn parse_date_value(value: &str) -> Option<NaiveDate> {
    // "2001-04-12T09:21:50Z", "2001-04-12", "12-apr-2001"
    let head = value.split(['T', ' ']).next().unwrap_or(value);
    if let Ok(d) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(head, "%d-%b-%Y") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(head, "%Y.%m.%d") {
        return Some(d);
    }
    None
}
