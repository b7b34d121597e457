use std::path::{Path, PathBuf};
use std::sync::Arc;

use cpu_affinity_engine::{
    AffinityController, MonitorEvent, NumaTopology, RunnerProfile, SchedulingApi, SystemApi,
    TopologyDetector,
};
use mimalloc::MiMalloc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// `profile.json` next to the executable unless a path is given.
fn profile_path() -> PathBuf {
    std::env::args_os().nth(1).map(PathBuf::from).unwrap_or_else(|| {
        std::env::current_exe()
            .map(|mut p| {
                p.set_file_name("profile.json");
                p
            })
            .unwrap_or_else(|_| "profile.json".into())
    })
}

fn load_profile(path: &Path) -> Result<RunnerProfile, String> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    RunnerProfile::from_json(&data).map_err(|e| format!("{}: {e}", path.display()))
}

fn log_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::Found { processes } => info!(count = processes.len(), "processes found"),
        MonitorEvent::NotFound { pattern } => info!(%pattern, "no matching process"),
        MonitorEvent::Applied { pid, mask, threads } => {
            info!(pid, %mask, ?threads, "affinity applied")
        }
        MonitorEvent::PrioritySet { pid, level } => info!(pid, ?level, "priority set"),
        MonitorEvent::Skipped { pid, reason } => warn!(pid, %reason, "process skipped"),
        MonitorEvent::Failed { pid, error } => warn!(pid, %error, "process not updated"),
        MonitorEvent::Exited { pid } => info!(pid, "process exited"),
        MonitorEvent::Fault { error, backoff } => error!(%error, ?backoff, "tick failed"),
        MonitorEvent::Started { .. } | MonitorEvent::Stopped => {}
    }
}

#[tokio::main]
async fn main() {
    let path = profile_path();
    let profile = match load_profile(&path) {
        Ok(profile) => profile,
        Err(e) => {
            eprintln!("Profile error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&profile.engine.log_filter)),
        )
        .init();

    let api: Arc<dyn SchedulingApi> = Arc::new(SystemApi);
    let topology = TopologyDetector::new(api.as_ref()).detect();
    if topology.die_count() > 1 {
        for die in 0..topology.die_count() {
            info!(die, cores = ?topology.cores_of_die(die), "die layout");
        }
    }

    let numa = NumaTopology::initialize(api.as_ref());
    if let Some(suggestion) = numa.suggest_grouping() {
        info!(
            node = suggestion.recommended_node,
            cores = ?suggestion.cores,
            background_nodes = ?suggestion.remaining_nodes,
            "latency-sensitive work fits best on this node"
        );
    }

    let request = match profile.binding.to_request(&topology) {
        Ok(request) => request,
        Err(e) => {
            error!("invalid binding: {e}");
            std::process::exit(1);
        }
    };
    if numa.is_cross_node_selection(&request.base_mask.indices().collect::<Vec<_>>()) {
        warn!(mask = %request.base_mask, "selection spans several numa nodes");
    }

    let mut controller = AffinityController::new(Arc::clone(&api), profile.engine.clone());

    if profile.apply_once {
        match controller.apply_once(&request.pattern, request.base_mask, request.sync_threads) {
            Ok((applied, failed)) => info!(applied, failed, "done"),
            Err(e) => {
                error!("apply failed: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let mut events = controller.start_monitoring(request);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            res = signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("unable to listen for shutdown signal: {e}");
                }
                break;
            }
        }
    }

    controller.shutdown().await;
    if let Some(stats) = controller.statistics() {
        info!(
            detected = stats.processes_detected,
            applications = stats.applications,
            failures = stats.failures,
            elapsed = ?stats.elapsed,
            "session finished"
        );
    }
}
