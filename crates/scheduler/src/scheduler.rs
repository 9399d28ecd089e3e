use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fluxgate_bus::{ChainEvent, EventBus, HandlerId, chain_handler_async};
use fluxgate_core::{
    BroadcastPayload, ChainEventType, ChainPayload, EventType, NoticeMessage, ServiceFn,
    ServiceRegistration, SystemErrorReport, Trigger,
};

use crate::error::SchedulerError;
use crate::types::{JobStatus, ScheduleInfo};

/// Interval of the common scheduler fan-out job.
const COMMON_JOB_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Interval of the addon marketplace refresh job.
const MARKET_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// Provider label for built-in jobs.
const SYSTEM_PROVIDER: &str = "[System]";

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Lifetime of cached data; drives the cache-clear job interval.
    pub cache_lifespan: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cache_lifespan: Duration::from_secs(24 * 3600),
        }
    }
}

struct JobEntry {
    id: String,
    name: String,
    /// Owning addon id for service jobs; `None` for system jobs.
    owner: Option<String>,
    provider: String,
    trigger: Trigger,
    func: ServiceFn,
    running: AtomicBool,
    next_run: Mutex<Option<DateTime<Utc>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobEntry {
    fn set_next_run(&self, at: Option<DateTime<Utc>>) {
        *self.next_run.lock().expect("job entry poisoned") = at;
    }
}

struct SchedulerInner {
    jobs: Mutex<HashMap<String, Arc<JobEntry>>>,
    bus: EventBus,
    shutdown: CancellationToken,
}

/// The job registry and trigger runtime.
///
/// `Clone` shares the scheduler; a clone is what the chain-event handlers
/// capture.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                jobs: Mutex::new(HashMap::new()),
                bus,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register a job and launch its trigger loop. An existing job with the
    /// same id is replaced.
    pub fn register(
        &self,
        job_id: impl Into<String>,
        name: impl Into<String>,
        owner: Option<String>,
        provider: impl Into<String>,
        trigger: Trigger,
        func: ServiceFn,
    ) -> Result<(), SchedulerError> {
        let job_id = job_id.into();

        // Validate cron triggers up front so registration errors surface to
        // the caller instead of a dead trigger loop.
        if let Trigger::Cron { expr, timezone } = &trigger {
            parse_cron(expr)?;
            parse_timezone(timezone.as_deref())?;
        }

        self.remove(&job_id);

        let entry = Arc::new(JobEntry {
            id: job_id.clone(),
            name: name.into(),
            owner,
            provider: provider.into(),
            trigger,
            func,
            running: AtomicBool::new(false),
            next_run: Mutex::new(None),
            task: Mutex::new(None),
        });

        let task = tokio::spawn(trigger_loop(
            self.clone(),
            Arc::clone(&entry),
            self.inner.shutdown.clone(),
        ));
        *entry.task.lock().expect("job entry poisoned") = Some(task);

        info!(job = %entry.id, name = %entry.name, trigger = %entry.trigger, "job registered");
        self.inner
            .jobs
            .lock()
            .expect("scheduler jobs poisoned")
            .insert(job_id, entry);
        Ok(())
    }

    /// Run one occurrence of a job now.
    ///
    /// When the job is already running the attempt is logged and skipped, so
    /// at most one execution of a job exists at any instant.
    pub async fn start(&self, job_id: &str) {
        let entry = {
            let jobs = self.inner.jobs.lock().expect("scheduler jobs poisoned");
            jobs.get(job_id).cloned()
        };
        let Some(entry) = entry else {
            warn!(job = job_id, "start requested for unknown job");
            return;
        };

        if entry.running.swap(true, Ordering::SeqCst) {
            warn!(job = %entry.id, name = %entry.name, "job is already running, skipping");
            return;
        }

        let result = (entry.func)().await;
        if let Err(err) = result {
            error!(job = %entry.id, name = %entry.name, error = %err, "job failed");
            self.inner.bus.send(
                EventType::NoticeMessage,
                BroadcastPayload::Notice(NoticeMessage {
                    title: format!("{} execution failed", entry.name),
                    message: err.to_string(),
                    role: "system".to_owned(),
                }),
            );
            let report = SystemErrorReport::new("scheduler", err.to_string())
                .with_context("scheduler_id", entry.id.clone())
                .with_context("scheduler_name", entry.name.clone());
            self.inner.bus.send(
                EventType::SystemError,
                BroadcastPayload::SystemError(report),
            );
        }

        entry.running.store(false, Ordering::SeqCst);
    }

    /// Remove a job and cancel its trigger loop.
    pub fn remove(&self, job_id: &str) {
        let removed = {
            let mut jobs = self.inner.jobs.lock().expect("scheduler jobs poisoned");
            jobs.remove(job_id)
        };
        if let Some(entry) = removed {
            if let Some(task) = entry.task.lock().expect("job entry poisoned").take() {
                task.abort();
            }
            info!(job = %entry.id, name = %entry.name, "job removed");
        }
    }

    /// Remove every job owned by an addon.
    pub fn remove_by_owner(&self, addon_id: &str) {
        let ids: Vec<String> = {
            let jobs = self.inner.jobs.lock().expect("scheduler jobs poisoned");
            jobs.values()
                .filter(|e| e.owner.as_deref() == Some(addon_id))
                .map(|e| e.id.clone())
                .collect()
        };
        for id in ids {
            self.remove(&id);
        }
    }

    /// Current job table for operator UIs, running jobs first, the rest by
    /// next run time.
    #[must_use]
    pub fn list(&self) -> Vec<ScheduleInfo> {
        let entries: Vec<Arc<JobEntry>> = {
            let jobs = self.inner.jobs.lock().expect("scheduler jobs poisoned");
            jobs.values().cloned().collect()
        };

        let mut infos: Vec<ScheduleInfo> = entries
            .iter()
            .map(|entry| {
                let status = if entry.running.load(Ordering::SeqCst) {
                    JobStatus::Running
                } else {
                    JobStatus::Waiting
                };
                ScheduleInfo {
                    id: entry.id.clone(),
                    name: entry.name.clone(),
                    provider: entry.provider.clone(),
                    status,
                    next_run: *entry.next_run.lock().expect("job entry poisoned"),
                }
            })
            .collect();

        infos.sort_by_key(|info| {
            (
                info.status != JobStatus::Running,
                info.next_run.unwrap_or(DateTime::<Utc>::MAX_UTC),
            )
        });
        infos
    }

    /// Register the built-in system jobs: the cache-clear sweep (every cache
    /// lifespan), the common scheduler fan-out (every ten minutes), and the
    /// addon marketplace refresh (every thirty minutes).
    pub fn install_builtin_jobs(
        &self,
        config: &SchedulerConfig,
        clear_cache: ServiceFn,
        common_job: ServiceFn,
        market_refresh: ServiceFn,
    ) -> Result<(), SchedulerError> {
        self.register(
            "clear_cache",
            "Clear Cache",
            None,
            SYSTEM_PROVIDER,
            Trigger::Interval {
                every: config.cache_lifespan,
                initial_delay: None,
            },
            clear_cache,
        )?;
        self.register(
            "scheduler_job",
            "Common Scheduler Service",
            None,
            SYSTEM_PROVIDER,
            Trigger::Interval {
                every: COMMON_JOB_INTERVAL,
                initial_delay: None,
            },
            common_job,
        )?;
        self.register(
            "addon_market_refresh",
            "Addon Market Cache",
            None,
            SYSTEM_PROVIDER,
            Trigger::Interval {
                every: MARKET_REFRESH_INTERVAL,
                initial_delay: None,
            },
            market_refresh,
        )
    }

    /// Subscribe to the addon service (de)registration chain events so addon
    /// services flow into the job table.
    pub fn wire_service_events(&self) {
        let scheduler = self.clone();
        self.inner.bus.subscribe_chain(
            ChainEventType::AddonServiceRegister,
            HandlerId::of::<Self>("handle_service_register"),
            fluxgate_bus::DEFAULT_EVENT_PRIORITY,
            chain_handler_async(move |event: &mut ChainEvent| {
                let scheduler = scheduler.clone();
                let registration = match &event.data {
                    ChainPayload::ServiceRegistration(reg) => Some(reg.clone()),
                    _ => None,
                };
                Box::pin(async move {
                    if let Some(registration) = registration {
                        scheduler.update_addon_tasks(&registration);
                    }
                    Ok(())
                })
            }),
        );

        let scheduler = self.clone();
        self.inner.bus.subscribe_chain(
            ChainEventType::AddonServiceDeregister,
            HandlerId::of::<Self>("handle_service_deregister"),
            fluxgate_bus::DEFAULT_EVENT_PRIORITY,
            chain_handler_async(move |event: &mut ChainEvent| {
                let scheduler = scheduler.clone();
                let addon_id = match &event.data {
                    ChainPayload::ServiceRegistration(reg) => Some(reg.addon_id.clone()),
                    _ => None,
                };
                Box::pin(async move {
                    if let Some(addon_id) = addon_id {
                        scheduler.remove_by_owner(&addon_id);
                    }
                    Ok(())
                })
            }),
        );
    }

    /// Replace all jobs of an addon with its current service list.
    fn update_addon_tasks(&self, registration: &ServiceRegistration) {
        let addon_id = &registration.addon_id;
        let provider = registration
            .addon_name
            .clone()
            .unwrap_or_else(|| addon_id.clone());

        self.remove_by_owner(addon_id);
        for service in &registration.services {
            let job_id = format!("{addon_id}_{}", service.id);
            let outcome = self.register(
                job_id,
                service.name.clone(),
                Some(addon_id.clone()),
                provider.clone(),
                service.trigger.clone(),
                Arc::clone(&service.func),
            );
            match outcome {
                Ok(()) => {
                    info!(addon = %provider, service = %service.name, trigger = %service.trigger, "registered addon job");
                }
                Err(err) => {
                    error!(addon = %provider, service = %service.name, error = %err, "failed to register addon job");
                    self.inner.bus.send(
                        EventType::NoticeMessage,
                        BroadcastPayload::Notice(NoticeMessage {
                            title: format!("Addon {provider} job registration failed"),
                            message: err.to_string(),
                            role: "system".to_owned(),
                        }),
                    );
                }
            }
        }
    }

    /// Cancel trigger loops and drop the job table. Jobs in flight finish on
    /// their own; no new occurrences fire.
    pub fn stop(&self) {
        info!("stopping scheduler jobs");
        self.inner.shutdown.cancel();
        let entries: Vec<Arc<JobEntry>> = {
            let mut jobs = self.inner.jobs.lock().expect("scheduler jobs poisoned");
            jobs.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            if let Some(task) = entry.task.lock().expect("job entry poisoned").take() {
                task.abort();
            }
        }
        info!("scheduler jobs stopped");
    }
}

fn parse_cron(expr: &str) -> Result<croner::Cron, SchedulerError> {
    croner::Cron::new(expr)
        .parse()
        .map_err(|e| SchedulerError::InvalidCron(format!("{e}")))
}

fn parse_timezone(tz: Option<&str>) -> Result<chrono_tz::Tz, SchedulerError> {
    match tz {
        None => Ok(chrono_tz::UTC),
        Some(tz) => tz
            .parse::<chrono_tz::Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(tz.to_owned())),
    }
}

/// Next cron occurrence after `after`, evaluated in `tz`.
fn next_cron_occurrence(
    cron: &croner::Cron,
    tz: chrono_tz::Tz,
    after: &DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let after_tz = after.with_timezone(&tz);
    cron.find_next_occurrence(&after_tz, false)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Drive one job's trigger until shutdown: sleep to the next occurrence,
/// fire, repeat. Date triggers fire once and leave the loop.
async fn trigger_loop(scheduler: Scheduler, entry: Arc<JobEntry>, shutdown: CancellationToken) {
    let mut interval_state: Option<Duration> = None;

    loop {
        let now = Utc::now();
        let (sleep_for, next_at) = match &entry.trigger {
            Trigger::Interval {
                every,
                initial_delay,
            } => {
                let delay = match interval_state {
                    None => initial_delay.unwrap_or(*every),
                    Some(every) => every,
                };
                interval_state = Some(*every);
                (
                    delay,
                    Some(now + chrono::Duration::from_std(delay).unwrap_or_default()),
                )
            }
            Trigger::Cron { expr, timezone } => {
                // Both were validated at registration.
                let Ok(cron) = parse_cron(expr) else { return };
                let Ok(tz) = parse_timezone(timezone.as_deref()) else {
                    return;
                };
                let Some(next) = next_cron_occurrence(&cron, tz, &now) else {
                    warn!(job = %entry.id, "cron trigger has no future occurrence");
                    entry.set_next_run(None);
                    return;
                };
                let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                (delay, Some(next))
            }
            Trigger::Date(at) => {
                if *at <= now {
                    entry.set_next_run(None);
                    return;
                }
                let delay = (*at - now).to_std().unwrap_or(Duration::ZERO);
                (delay, Some(*at))
            }
        };

        entry.set_next_run(next_at);

        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(sleep_for) => {}
        }

        scheduler.start(&entry.id).await;

        if matches!(entry.trigger, Trigger::Date(_)) {
            entry.set_next_run(None);
            return;
        }
    }
}
