use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub instances_started: AtomicU64,
    pub instances_ready: AtomicU64,
    pub start_timeouts: AtomicU64,
    pub start_failures: AtomicU64,
    pub instances_deleted: AtomicU64,
    pub instances_reaped: AtomicU64,
    pub sink_failures: AtomicU64,
}

impl Metrics {
    pub fn record_start(&self) {
        self.instances_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ready(&self) {
        self.instances_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.start_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.start_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.instances_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reaped(&self, count: u64) {
        self.instances_reaped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("challenge_orchestrator=info,kube=info")
    })
}

#[cfg(not(debug_assertions))]
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .json()
        .init();
}

#[cfg(debug_assertions)]
pub fn init() {
    tracing_subscriber::fmt()
        .pretty()
        .without_time()
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter())
        .init();
}
