use anyhow::{Context, Result};
use log::{debug, info};
use std::io::Write;
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::engine::Session;
use crate::http::{AcceptableStatusSet, LogicalRequest, LogicalResponse, reason_phrase};
use crate::interceptor::parse_header_line;
use crate::transport::ReqwestTransport;

/// Per-invocation overrides for `reqflow get`.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub url: String,
    pub accept: Option<AcceptableStatusSet>,
    pub retries: Option<u32>,
    pub timeout_secs: Option<u64>,
    /// Raw `Name: value` lines.
    pub headers: Vec<String>,
    pub include_headers: bool,
}

impl GetOptions {
    fn apply(&self, config: &mut SessionConfig) {
        if let Some(accept) = &self.accept {
            config.acceptable_status_codes = accept.clone();
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        if let Some(timeout) = self.timeout_secs {
            config.timeout_secs = timeout;
        }
    }
}

/// Perform one GET through a session and print the outcome to `out`.
///
/// Whatever response the last attempt got is printed even when the request
/// ends in an error; the error is then returned.
#[tracing::instrument(skip(config, options, out), fields(url = %options.url))]
pub async fn get(
    mut config: SessionConfig,
    options: &GetOptions,
    out: &mut impl Write,
) -> Result<()> {
    options.apply(&mut config);
    config.validate()?;
    let transport = ReqwestTransport::from_config(&config)?;
    let session = Session::new(config, Arc::new(transport));
    for line in &options.headers {
        session.add_interceptor(parse_header_line(line)?);
    }

    let task = session.submit(LogicalRequest::get(options.url.as_str()), None, None);
    task.resume();
    let (response, error) = task.wait().await;
    debug!("{} finished after {} retries", task.id(), task.retry_count());

    if let Some(response) = &response {
        print_response(response, options.include_headers, out)?;
    }
    session.close();

    match error {
        Some(error) => {
            info!("Request to {} failed: {}", options.url, error);
            Err(error).with_context(|| format!("GET {} failed", options.url))
        }
        None => Ok(()),
    }
}

fn print_response(
    response: &LogicalResponse,
    include_headers: bool,
    out: &mut impl Write,
) -> Result<()> {
    if let Some(status) = response.status() {
        writeln!(out, "HTTP {} {}", status.as_u16(), reason_phrase(status.as_u16()))?;
    }
    if include_headers {
        for (name, value) in response.headers() {
            writeln!(out, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
        }
        writeln!(out)?;
    }
    out.write_all(response.body())?;
    if !response.body().ends_with(b"\n") && !response.body().is_empty() {
        writeln!(out)?;
    }
    Ok(())
}

/// Print the effective configuration as pretty JSON.
pub fn config(config: &SessionConfig, out: &mut impl Write) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    writeln!(out, "{}", json)?;
    Ok(())
}
