use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use serde_json::json;
use uuid::Uuid;

use stampede_core::{
    constant, CallResult, Config, Engine, Error, Gun, LoadType, RunContext, SamplerConfig,
    VirtualUser,
};

#[derive(Debug, Parser)]
#[command(name = "stampede-cli", about = "Headless load generator for HTTP targets")]
struct Args {
    /// Target URL, requested with GET.
    #[arg(long)]
    url: String,

    /// Pacing model: a fixed request rate or a fleet of virtual users.
    #[arg(long, value_enum, default_value_t = Mode::Rate)]
    mode: Mode,

    /// Requests per second (rate mode) or concurrent users (vu mode).
    #[arg(long, default_value_t = 10)]
    level: i64,

    /// Test duration in seconds.
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Per-call timeout in seconds.
    #[arg(long, default_value_t = 60)]
    call_timeout: u64,

    /// Percentage of successful responses to retain, 0-100.
    #[arg(long, default_value_t = 100)]
    record_percent: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Rate,
    Vu,
}

struct HttpGun {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl Gun for HttpGun {
    async fn call(&self, _ctx: &RunContext) -> CallResult {
        http_get(&self.client, &self.url).await
    }
}

struct HttpVu {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl VirtualUser for HttpVu {
    fn clone_user(&self) -> Box<dyn VirtualUser> {
        Box::new(Self {
            client: self.client.clone(),
            url: self.url.clone(),
        })
    }

    async fn setup(&mut self, _ctx: &RunContext) -> Result<(), Error> {
        Ok(())
    }

    async fn call(&mut self, ctx: &RunContext) {
        let started_at = Utc::now();
        let mut result = http_get(&self.client, &self.url).await;
        result.started_at = Some(started_at);
        ctx.report(result).await;
    }

    async fn teardown(&mut self, _ctx: &RunContext) -> Result<(), Error> {
        Ok(())
    }
}

async fn http_get(client: &reqwest::Client, url: &str) -> CallResult {
    match client.get(url).send().await {
        Ok(response) => {
            let status = response.status();
            match response.bytes().await {
                Ok(body) if status.is_success() => CallResult::ok_with_group(
                    json!({"status": status.as_u16(), "bytes": body.len()}),
                    "http",
                ),
                Ok(_) => CallResult::failure(
                    format!("status {status}"),
                    json!({"status": status.as_u16()}),
                ),
                Err(err) => CallResult::failure(format!("body read error: {err}"), json!(null)),
            }
        }
        Err(err) => CallResult::failure(format!("network error: {err}"), json!(null)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    stampede_core::init_default_logging();
    let args = Args::parse();

    let call_timeout = Duration::from_secs(args.call_timeout);
    let client = reqwest::Client::builder()
        .timeout(call_timeout)
        .user_agent(concat!("stampede/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let schedule = constant(args.level, Duration::from_secs(args.duration));
    let mut cfg = Config {
        name: "stampede".to_string(),
        schedule,
        call_timeout,
        labels: [("run_id".to_string(), Uuid::new_v4().to_string())].into(),
        sampler: SamplerConfig {
            success_record_percent: args.record_percent,
        },
        ..Config::default()
    };
    match args.mode {
        Mode::Rate => {
            cfg.load_type = LoadType::Rate;
            cfg.gun = Some(Arc::new(HttpGun {
                client,
                url: args.url.clone(),
            }));
        }
        Mode::Vu => {
            cfg.load_type = LoadType::Vu;
            cfg.vu = Some(Box::new(HttpVu {
                client,
                url: args.url.clone(),
            }));
        }
    }

    let engine = Engine::new(cfg)?;
    tracing::info!(url = %args.url, level = args.level, "starting load");
    let (_, failed) = engine.run().await;

    println!(
        "{}",
        serde_json::to_string_pretty(&engine.stats().snapshot())?
    );
    for error in engine.errors().iter().take(10) {
        tracing::warn!(error = %error, "call error");
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
