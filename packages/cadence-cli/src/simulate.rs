//! Synthetic workload for exercising the scheduler end to end.
//!
//! Long normal-priority jobs made of fixed-cost units compete with periodic
//! user-blocking interruptions, each of which queues a small batch of sync
//! work. The report shows how the engine sliced the jobs and how long the
//! interruptions waited.

use anyhow::Result;
use cadence_core::{RenderPriority, Runtime, RuntimeConfig};
use cadence_scheduler::{
    Callback, CallbackOptions, Continuation, EventLoop, HostCallbackLoop, LocalHost,
    LocalScheduler, ManualClock, Profiling, SchedulerError, SystemClock, callback,
};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub jobs: u32,
    pub units_per_job: u32,
    pub unit_cost_ms: f64,
    pub interruptions: u32,
    pub interrupt_every_ms: f64,
    pub sync_per_interruption: u32,
    /// `None` simulates a host without animation frames.
    pub frame_interval_ms: Option<f64>,
    /// Sleep through the workload on the system clock instead of jumping
    /// through virtual time.
    pub real_time: bool,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            jobs: 8,
            units_per_job: 50,
            unit_cost_ms: 2.0,
            interruptions: 5,
            interrupt_every_ms: 40.0,
            sync_per_interruption: 2,
            frame_interval_ms: Some(16.0),
            real_time: false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: u32,
    pub mean_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    fn record(&mut self, latency_ms: f64) {
        let total = self.mean_ms * f64::from(self.count) + latency_ms;
        self.count += 1;
        self.mean_ms = total / f64::from(self.count);
        self.max_ms = self.max_ms.max(latency_ms);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub strategy: &'static str,
    pub elapsed_ms: f64,
    pub jobs_completed: u32,
    pub units_run: u64,
    pub job_resumptions: u64,
    pub interruption_latency: LatencySummary,
    pub sync_callbacks_run: u32,
    pub frames_delivered: u64,
    pub active_frame_time_ms: Option<f64>,
    pub profile: Profiling,
}

#[derive(Default)]
struct Stats {
    jobs_completed: u32,
    units_run: u64,
    job_resumptions: u64,
    interruption_latency: LatencySummary,
    sync_callbacks_run: u32,
}

struct Simulation {
    runtime: Runtime<LocalScheduler>,
    host: Rc<LocalHost>,
    options: SimulateOptions,
    stats: RefCell<Stats>,
}

fn job(sim: Weak<Simulation>, mut remaining: u32, resumed: bool) -> Callback {
    callback(move |_did_timeout| {
        let Some(this) = sim.upgrade() else {
            return Ok(Continuation::Done);
        };
        if resumed {
            this.stats.borrow_mut().job_resumptions += 1;
        }
        while remaining > 0 {
            this.host.advance(this.options.unit_cost_ms);
            remaining -= 1;
            this.stats.borrow_mut().units_run += 1;
            if remaining > 0 && this.runtime.should_yield() {
                return Ok(Continuation::Continue(job(sim.clone(), remaining, true)));
            }
        }
        this.stats.borrow_mut().jobs_completed += 1;
        tracing::debug!("job finished at {:.1}ms", this.runtime.now());
        Ok(Continuation::Done)
    })
}

fn interruption(sim: Weak<Simulation>, requested_at: f64) -> Callback {
    callback(move |_| {
        let Some(this) = sim.upgrade() else {
            return Ok(Continuation::Done);
        };
        let latency = this.runtime.now() - requested_at;
        this.stats.borrow_mut().interruption_latency.record(latency);
        tracing::debug!("interruption handled after {:.1}ms", latency);

        this.runtime.batched_updates(|| {
            for _ in 0..this.options.sync_per_interruption {
                let sim = sim.clone();
                this.runtime.schedule_sync_callback(callback(move |_| {
                    if let Some(this) = sim.upgrade() {
                        this.stats.borrow_mut().sync_callbacks_run += 1;
                    }
                    Ok(Continuation::Done)
                }));
            }
        })?;
        Ok(Continuation::Done)
    })
}

pub fn run_simulation(options: SimulateOptions, config: &RuntimeConfig) -> Result<SimulationReport> {
    let host = Rc::new(if options.real_time {
        LocalHost::new(SystemClock::new(), options.frame_interval_ms)
    } else {
        LocalHost::new(ManualClock::new(), options.frame_interval_ms)
    });
    let host_loop = if host.supports_frames() {
        HostCallbackLoop::frame_paced(host.clone(), config.frame_pacing.clone())
    } else {
        HostCallbackLoop::immediate(host.clone())
    };
    let strategy = if host_loop.is_frame_paced() {
        "frame_paced"
    } else {
        "immediate"
    };
    let runtime = Runtime::local(host_loop, config)?;

    let sim = Rc::new(Simulation {
        runtime,
        host: host.clone(),
        options,
        stats: RefCell::new(Stats::default()),
    });

    tracing::info!(
        "simulating {} jobs of {} units with {} interruptions ({})",
        sim.options.jobs,
        sim.options.units_per_job,
        sim.options.interruptions,
        strategy
    );

    for _ in 0..sim.options.jobs {
        sim.runtime.schedule_callback(
            RenderPriority::Normal,
            job(Rc::downgrade(&sim), sim.options.units_per_job, false),
            CallbackOptions::default(),
        );
    }
    for index in 1..=sim.options.interruptions {
        let weak = Rc::downgrade(&sim);
        host.set_timeout(
            Box::new(move || -> Result<(), SchedulerError> {
                if let Some(this) = weak.upgrade() {
                    let requested_at = this.runtime.now();
                    this.runtime.schedule_callback(
                        RenderPriority::UserBlocking,
                        interruption(weak.clone(), requested_at),
                        CallbackOptions::default(),
                    );
                }
                Ok(())
            }),
            f64::from(index) * sim.options.interrupt_every_ms,
        );
    }

    host.run_until_idle()?;

    let stats = sim.stats.borrow();
    let report = SimulationReport {
        strategy,
        elapsed_ms: sim.runtime.now(),
        jobs_completed: stats.jobs_completed,
        units_run: stats.units_run,
        job_resumptions: stats.job_resumptions,
        interruption_latency: stats.interruption_latency.clone(),
        sync_callbacks_run: stats.sync_callbacks_run,
        frames_delivered: host.frames_delivered(),
        active_frame_time_ms: sim.runtime.scheduler().host().active_frame_time(),
        profile: sim.runtime.profile(),
    };
    tracing::info!(
        "simulation finished at {:.1}ms after {} slices",
        report.elapsed_ms,
        report.profile.slices
    );
    Ok(report)
}
