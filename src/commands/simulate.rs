// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::FairlockConfig;
use crate::coordination::memory::MemoryCoordinator;
use crate::error::{FairlockError, Result};
use crate::locking::{
    CancellationToken, LockController, LockMetrics, LockRequest, LockTimeoutValue, MetricsSnapshot,
};
use colored::Colorize;
use comfy_table::{Cell, CellAlignment, Table, presets::UTF8_FULL};
use log::{debug, info};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub root: String,
    pub workers: usize,
    pub hold: Duration,
    pub timeout: LockTimeoutValue,
    pub json: bool,
}

/// What happened to one competitor.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerOutcome {
    pub worker: usize,
    /// Position in grant order, for workers that got the lock.
    pub order: Option<usize>,
    pub sequence: Option<u64>,
    pub waited_ms: u64,
    pub held_ms: u64,
    pub outcome: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub root: String,
    pub workers: usize,
    pub timeout: String,
    pub outcomes: Vec<WorkerOutcome>,
    /// Grants happened in ascending sequence order.
    pub fifo: bool,
    /// Never more than one holder at a time.
    pub exclusive: bool,
    pub metrics: MetricsSnapshot,
    pub elapsed_ms: u64,
}

impl SimulationReport {
    pub fn acquired(&self) -> usize {
        self.outcomes.iter().filter(|o| o.order.is_some()).count()
    }
}

#[derive(Default)]
struct Ledger {
    holders: AtomicUsize,
    peak_holders: AtomicUsize,
    grants: Mutex<Vec<u64>>,
}

impl Ledger {
    /// Records a grant and returns its position.
    fn enter(&self, sequence: u64) -> usize {
        let holders = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_holders.fetch_max(holders, Ordering::SeqCst);
        let mut grants = self.grants.lock().unwrap_or_else(PoisonError::into_inner);
        grants.push(sequence);
        grants.len()
    }

    fn leave(&self) {
        self.holders.fetch_sub(1, Ordering::SeqCst);
    }

    fn fifo(&self) -> bool {
        let grants = self.grants.lock().unwrap_or_else(PoisonError::into_inner);
        grants.windows(2).all(|pair| pair[0] < pair[1])
    }

    fn exclusive(&self) -> bool {
        self.peak_holders.load(Ordering::SeqCst) <= 1
    }
}

pub struct SimulateCommand<'a> {
    config: &'a FairlockConfig,
    cancellation: CancellationToken,
}

impl<'a> SimulateCommand<'a> {
    pub fn new(config: &'a FairlockConfig, cancellation: CancellationToken) -> Result<Self> {
        config.locking.validate()?;
        Ok(Self {
            config,
            cancellation,
        })
    }

    pub fn execute(&self, options: &SimulateOptions) -> Result<()> {
        let report = self.run(options)?;

        if options.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }

        if self.cancellation.is_cancelled() {
            return Err(FairlockError::Cancelled {
                root: report.root,
                waited_secs: report.elapsed_ms as f64 / 1_000.0,
            });
        }
        Ok(())
    }

    /// Runs every worker to completion against a fresh in-memory service.
    pub fn run(&self, options: &SimulateOptions) -> Result<SimulationReport> {
        if options.workers == 0 {
            return Err(FairlockError::InvalidConfig(
                "--workers must be at least 1".to_string(),
            ));
        }

        let coordinator = MemoryCoordinator::new();
        // Fails fast on a bad root before any thread starts.
        LockController::from_config(Arc::new(coordinator.connect()), &self.config.locking)?
            .handle(&options.root)?;

        let metrics = Arc::new(LockMetrics::new());
        let ledger = Ledger::default();
        let started = Instant::now();
        info!(
            "Simulating {} workers on {} (hold {}ms, timeout {})",
            options.workers,
            options.root,
            options.hold.as_millis(),
            options.timeout
        );

        let mut outcomes = thread::scope(|scope| {
            let workers: Vec<_> = (0..options.workers)
                .map(|worker| {
                    let coordinator = &coordinator;
                    let metrics = Arc::clone(&metrics);
                    let ledger = &ledger;
                    scope.spawn(move || {
                        self.run_worker(worker, coordinator, metrics, ledger, options)
                    })
                })
                .collect();

            workers
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| WorkerOutcome::failed(worker, "worker panicked"))
                })
                .collect::<Vec<_>>()
        });
        outcomes.sort_by_key(|o| (o.order.unwrap_or(usize::MAX), o.worker));

        Ok(SimulationReport {
            root: options.root.clone(),
            workers: options.workers,
            timeout: options.timeout.to_string(),
            outcomes,
            fifo: ledger.fifo(),
            exclusive: ledger.exclusive(),
            metrics: metrics.snapshot(),
            elapsed_ms: millis(started.elapsed()),
        })
    }

    fn run_worker(
        &self,
        worker: usize,
        coordinator: &MemoryCoordinator,
        metrics: Arc<LockMetrics>,
        ledger: &Ledger,
        options: &SimulateOptions,
    ) -> WorkerOutcome {
        let result = LockController::from_config(
            Arc::new(coordinator.connect()),
            &self.config.locking,
        )
        .map(|controller| controller.with_observer(metrics));
        let controller = match result {
            Ok(controller) => controller,
            Err(err) => return WorkerOutcome::failed(worker, &err.to_string()),
        };

        let request = LockRequest::new(options.timeout)
            .with_cancellation(self.cancellation.clone())
            .with_correlation(format!("worker-{worker}"));
        let waiting = Instant::now();
        let handle = match controller.acquire_with(&options.root, request) {
            Ok(handle) => handle,
            Err(err) => {
                debug!("worker {worker} gave up: {err}");
                return WorkerOutcome {
                    waited_ms: millis(waiting.elapsed()),
                    ..WorkerOutcome::failed(worker, &err.to_string())
                };
            }
        };
        let waited_ms = millis(waiting.elapsed());

        let sequence = handle.sequence().unwrap_or_default();
        let order = ledger.enter(sequence);
        let holding = Instant::now();
        thread::sleep(options.hold);
        let held_ms = millis(holding.elapsed());
        ledger.leave();

        let outcome = match handle.release() {
            Ok(()) => "acquired".to_string(),
            Err(err) => format!("acquired, release failed: {err}"),
        };
        WorkerOutcome {
            worker,
            order: Some(order),
            sequence: Some(sequence),
            waited_ms,
            held_ms,
            outcome,
        }
    }
}

impl WorkerOutcome {
    fn failed(worker: usize, reason: &str) -> Self {
        Self {
            worker,
            order: None,
            sequence: None,
            waited_ms: 0,
            held_ms: 0,
            outcome: reason.to_string(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn verdict(ok: bool) -> String {
    if ok {
        "✓ held".green().to_string()
    } else {
        "✗ violated".red().to_string()
    }
}

fn print_report(report: &SimulationReport) {
    println!(
        "{} {} workers on {} (timeout {})",
        "Simulated".bold(),
        report.workers,
        report.root.cyan(),
        report.timeout
    );
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Order", "Worker", "Sequence", "Waited", "Held", "Outcome"]);
    for outcome in &report.outcomes {
        let order = outcome.order.map(|o| o.to_string()).unwrap_or_else(|| "-".to_string());
        let sequence = outcome
            .sequence
            .map(|s| format!("{s:010}"))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(order).set_alignment(CellAlignment::Right),
            Cell::new(outcome.worker).set_alignment(CellAlignment::Right),
            Cell::new(sequence),
            Cell::new(format!("{}ms", outcome.waited_ms)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{}ms", outcome.held_ms)).set_alignment(CellAlignment::Right),
            Cell::new(&outcome.outcome),
        ]);
    }
    println!("{table}");
    println!();

    println!("FIFO order:      {}", verdict(report.fifo));
    println!("Mutual exclusion: {}", verdict(report.exclusive));
    println!(
        "Acquired {}/{} in {}ms; {} watch waits, {} wakeups, {} timed out, {} cancelled",
        report.acquired().to_string().bold(),
        report.workers,
        report.elapsed_ms,
        report.metrics.watch_waits,
        report.metrics.wakeups,
        report.metrics.timed_out,
        report.metrics.cancelled
    );
}
