//! # Line floor demo
//!
//! Wires the three workflow kinds against an in-memory warehouse:
//! - `lines`: interval pipeline with a conditional balance step
//! - `knr`: daily batch (runs right away when `KNR_RUN_AFTER_HOUR` is unset)
//! - `sap`: integration poll whose login step keeps failing
//! - `pkmc`: on-demand pipeline, requested once in the background at startup
//!
//! Configuration comes from the environment (`.env` is honored), e.g.
//! `LINES_POLL_INTERVAL_SECS=5 cargo run --example line_floor`.
//! Stops on Ctrl-C, or by itself when `KNR_FAIL=1` makes the batch report a
//! fatal inconsistency.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use linevisor::{
    DailyBatch, DataError, DataLayer, Event, EventKind, IntegrationPoll, Pipeline, Stage, Step, Subscribe,
    SupervisorBuilder, SupervisorConfig, TaskError, TaskFn, TaskRef, WorkflowConfig,
};

#[derive(Default)]
struct Warehouse {
    rows: Mutex<HashMap<String, u64>>,
    done: Mutex<HashMap<String, NaiveDate>>,
}

#[async_trait]
impl DataLayer for Warehouse {
    async fn row_count(&self, dataset: &str) -> Result<u64, DataError> {
        Ok(self.rows.lock().await.get(dataset).copied().unwrap_or(0))
    }

    async fn last_completed(&self, dataset: &str) -> Result<Option<NaiveDate>, DataError> {
        Ok(self.done.lock().await.get(dataset).copied())
    }
}

/// Pretends to load `dataset` and bumps its row count.
fn loader(name: &'static str, warehouse: Arc<Warehouse>) -> TaskRef {
    let loads = Arc::new(AtomicU64::new(0));
    TaskFn::arc(name, move |ctx: CancellationToken| {
        let warehouse = warehouse.clone();
        let loads = loads.clone();
        async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(300)) => {},
                _ = ctx.cancelled() => return Err(TaskError::Canceled),
            }
            let n = loads.fetch_add(1, Ordering::Relaxed) + 1;
            *warehouse.rows.lock().await.entry(name.to_string()).or_default() += 10;
            println!("📦 {name}: load #{n} done");
            Ok(())
        }
    })
}

/// Marks `dataset` as completed today.
fn marker(name: &'static str, warehouse: Arc<Warehouse>) -> TaskRef {
    TaskFn::arc(name, move |_ctx: CancellationToken| {
        let warehouse = warehouse.clone();
        async move {
            warehouse
                .done
                .lock()
                .await
                .insert(name.to_string(), Local::now().date_naive());
            println!("🗓️  {name}: marked complete");
            Ok::<(), TaskError>(())
        }
    })
}

fn verify(fail: bool) -> TaskRef {
    TaskFn::arc("knr_verify", move |_ctx: CancellationToken| async move {
        if fail {
            return Err(TaskError::fatal("knrs_vivos and knrs_fx4pd disagree"));
        }
        println!("✅ knr_verify: datasets agree");
        Ok(())
    })
}

fn sap_login() -> TaskRef {
    TaskFn::arc("sap_login", |_ctx: CancellationToken| async move {
        Err::<(), TaskError>(TaskError::fail("gui scripting disabled"))
    })
}

struct Console;

#[async_trait]
impl Subscribe for Console {
    async fn on_event(&self, ev: &Event) {
        match ev.kind {
            EventKind::CycleAborted | EventKind::GateBusy | EventKind::TimeoutHit | EventKind::FatalEscalation => {
                println!(
                    "⚠️  [{}] {:?} task={:?} reason={:?}",
                    ev.workflow.as_deref().unwrap_or("-"),
                    ev.kind,
                    ev.task.as_deref(),
                    ev.reason.as_deref()
                );
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "console"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = SupervisorConfig::from_env()?;
    let warehouse = Arc::new(Warehouse::default());
    let data: Arc<dyn DataLayer> = warehouse.clone();

    let lines = Pipeline::new(data.clone())
        .step(Step::new(loader("common_vehicles", warehouse.clone())))
        .step(Step::new(loader("assembly_line", warehouse.clone())))
        .step(Step::new(loader("lb_balance", warehouse.clone())).when_rows(["common_vehicles", "assembly_line"]));

    let fail = std::env::var("KNR_FAIL").is_ok_and(|v| v == "1");
    let knr = DailyBatch::new(data, ["knrs_vivos", "knrs_fx4pd"])
        .stage(Stage::inline(loader("knr_email", warehouse.clone())))
        .stage(Stage::retried(loader("verify_files", warehouse.clone()), 3, Duration::from_secs(2)))
        .stage(Stage::inline(marker("knrs_fx4pd", warehouse.clone())))
        .stage(Stage::gated(marker("knrs_vivos", warehouse.clone())))
        .stage(Stage::gated(verify(fail)));

    let sap = IntegrationPoll::new(vec![sap_login(), loader("sap_request", warehouse.clone())]);

    let sup = SupervisorBuilder::new(cfg.clone())
        .with_subscribers(vec![Arc::new(Console) as Arc<dyn Subscribe>])
        .workflow("lines", "Line feed", WorkflowConfig::from_env("LINES", &cfg)?, lines)
        .workflow("knr", "KNR daily batch", WorkflowConfig::from_env("KNR", &cfg)?, knr)
        .workflow("sap", "SAP integration", WorkflowConfig::from_env("SAP", &cfg)?, sap)
        .pipeline("pkmc", loader("pkmc", warehouse.clone()))
        .build()?;

    for id in ["lines", "knr", "sap"] {
        sup.start(id).await?;
    }
    let pkmc = sup.run_pipeline_detached("pkmc")?;
    tokio::spawn(async move {
        if let Ok(out) = pkmc.await {
            println!("🔧 pkmc on demand: succeeded={}", out.succeeded());
        }
    });
    println!("{}", serde_json::to_string_pretty(&sup.status())?);

    let cause = sup.run_until_shutdown().await;
    println!("🛑 shutdown: {}", cause.as_label());
    println!("{}", serde_json::to_string_pretty(&sup.status())?);
    Ok(())
}
