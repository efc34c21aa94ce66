// ── Coordinator ──
//
// Full lifecycle for one vendor account: initial setup, periodic and
// manual refresh, the live-update listener and its renewal, deferred
// end-of-cycle refreshes, and command routing. All state flows into the
// ApplianceStore; consumers read from there.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use applisync_api::{
    ApplianceApi, ApplianceSummary, CloudClient, CredentialManager, PushEvent, PushHandle,
    PushSource, StreamStatus,
};

use crate::capability::{CapabilityResolver, Resolution};
use crate::command::{self, Command, CommandEnvelope, CommandOutcome, rejection};
use crate::config::CoordinatorConfig;
use crate::error::CoreError;
use crate::model::{ApplianceId, ApplianceRecord, Connectivity, PropertyPath, leaf_paths};
use crate::overlay::OptimisticOverlay;
use crate::store::{ApplianceStore, MergeOutcome, StateChange, UpdateSource};
use crate::stream::ApplianceStream;

const COMMAND_CHANNEL_SIZE: usize = 64;

// ── ConnectionState ──────────────────────────────────────────────────

/// Coordinator lifecycle, observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Starting,
    Running,
    /// Credentials were rejected for good. Nothing recovers until the
    /// user re-authorizes.
    ReauthRequired,
}

/// Result of a full refresh pass.
#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub snapshot: Arc<Vec<Arc<ApplianceRecord>>>,
    pub added: Vec<ApplianceId>,
    pub purged: Vec<ApplianceId>,
    pub preserved: Vec<ApplianceId>,
    /// Appliances whose state fetch failed. Their last known state stays.
    pub failed: Vec<ApplianceId>,
    /// Appliances that moved from disconnected to connected.
    pub reconnected: Vec<ApplianceId>,
}

/// A running listener plus the task bridging its events into the store.
struct PushRuntime {
    handle: PushHandle,
    bridge: JoinHandle<()>,
    cancel: CancellationToken,
}

impl PushRuntime {
    async fn shutdown(self) {
        self.cancel.cancel();
        self.handle.shutdown().await;
        if let Err(e) = self.bridge.await {
            warn!(error = %e, "live update bridge ended abnormally");
        }
    }
}

// ── Coordinator ──────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<CoordinatorInner>`. Construct with
/// [`new`](Self::new), then call [`start`](Self::start).
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    api: Arc<dyn ApplianceApi>,
    push_source: Option<Arc<dyn PushSource>>,
    credentials: Option<Arc<CredentialManager>>,
    store: Arc<ApplianceStore>,
    resolver: CapabilityResolver,
    overlay: OptimisticOverlay,
    connection_state: watch::Sender<ConnectionState>,
    command_tx: Mutex<mpsc::Sender<CommandEnvelope>>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    /// Token for the current run. Cancelled on stop, replaced on start.
    cancel_child: Mutex<CancellationToken>,
    push: Mutex<Option<PushRuntime>>,
    last_push_restart: Mutex<Option<Instant>>,
    /// At most one pending end-of-cycle refresh per appliance.
    deferred: Mutex<HashMap<ApplianceId, JoinHandle<()>>>,
    last_manual_sync: Mutex<Option<Instant>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Create a coordinator. Does NOT contact the vendor until
    /// [`start()`](Self::start).
    ///
    /// `push_source` may be `None` to run on polling alone. When
    /// `credentials` is given, a rejected renewal moves the coordinator
    /// to [`ConnectionState::ReauthRequired`].
    pub fn new(
        config: CoordinatorConfig,
        api: Arc<dyn ApplianceApi>,
        push_source: Option<Arc<dyn PushSource>>,
        credentials: Option<Arc<CredentialManager>>,
    ) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let overlay = OptimisticOverlay::new(config.overlay_ttl);

        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                api,
                push_source,
                credentials,
                store: Arc::new(ApplianceStore::new()),
                resolver: CapabilityResolver::new(),
                overlay,
                connection_state,
                command_tx: Mutex::new(command_tx),
                command_rx: Mutex::new(Some(command_rx)),
                cancel_child: Mutex::new(CancellationToken::new()),
                push: Mutex::new(None),
                last_push_restart: Mutex::new(None),
                deferred: Mutex::new(HashMap::new()),
                last_manual_sync: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Wire a [`CloudClient`] in as dispatcher, event source, and
    /// credential owner.
    pub fn from_client(config: CoordinatorConfig, client: Arc<CloudClient>) -> Self {
        let credentials = Arc::clone(client.credentials());
        let api: Arc<dyn ApplianceApi> = client.clone();
        let push: Arc<dyn PushSource> = client;
        Self::new(config, api, Some(push), Some(credentials))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<ApplianceStore> {
        &self.inner.store
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Discover appliances, fetch their details and state, and spawn the
    /// background tasks.
    ///
    /// Individual appliance failures do not fail startup: they are
    /// tracked as placeholders and backfilled later. Only a listing
    /// failure or rejected credentials abort.
    pub async fn start(&self) -> Result<(), CoreError> {
        let current = *self.inner.connection_state.borrow();
        if matches!(current, ConnectionState::Starting | ConnectionState::Running) {
            debug!(state = %current, "coordinator already started");
            return Ok(());
        }
        self.inner
            .connection_state
            .send_replace(ConnectionState::Starting);

        let cancel = CancellationToken::new();
        *self.inner.cancel_child.lock().await = cancel.clone();

        if let Err(e) = self.setup().await {
            if e.requires_reauth() {
                self.mark_reauth_required(&e.to_string());
            } else {
                self.inner
                    .connection_state
                    .send_replace(ConnectionState::Disconnected);
            }
            return Err(e);
        }

        let config = &self.inner.config;
        let mut handles = self.inner.task_handles.lock().await;

        if let Some(rx) = self.inner.command_rx.lock().await.take() {
            handles.push(tokio::spawn(command_processor_task(
                self.clone(),
                rx,
                cancel.clone(),
            )));
        }

        if !config.refresh_interval.is_zero() {
            handles.push(tokio::spawn(refresh_task(
                self.clone(),
                config.refresh_interval,
                cancel.clone(),
            )));
        }

        if let Some(credentials) = &self.inner.credentials {
            handles.push(tokio::spawn(reauth_watch_task(
                self.clone(),
                credentials.reauth_required(),
                cancel.clone(),
            )));
        }

        if self.push_configured() {
            self.restart_push().await;
            if !config.push_renewal_interval.is_zero() {
                handles.push(tokio::spawn(push_renewal_task(self.clone(), cancel.clone())));
            }
        }
        drop(handles);

        // The reauth watcher may already have flagged a rejected renewal.
        self.inner.connection_state.send_if_modified(|state| {
            if *state == ConnectionState::Starting {
                *state = ConnectionState::Running;
                true
            } else {
                false
            }
        });
        info!(appliances = self.inner.store.len(), "coordinator running");
        Ok(())
    }

    /// Cancel background work and wait for it to finish. The store keeps
    /// its contents; [`start()`](Self::start) may be called again.
    pub async fn stop(&self) {
        self.inner.cancel_child.lock().await.cancel();

        self.stop_push().await;

        let deferred: Vec<_> = self
            .inner
            .deferred
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in deferred {
            handle.abort();
            let _ = handle.await;
        }

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        // The processor consumed the previous receiver.
        {
            let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
            *self.inner.command_tx.lock().await = tx;
            *self.inner.command_rx.lock().await = Some(rx);
        }

        self.inner
            .connection_state
            .send_replace(ConnectionState::Disconnected);
        info!("coordinator stopped");
    }

    async fn setup(&self) -> Result<(), CoreError> {
        let config = &self.inner.config;
        let listing =
            with_timeout(config.setup_total_timeout, self.inner.api.list_appliances()).await?;
        info!(count = listing.len(), "discovered appliances");

        let setups = join_all(listing.iter().map(|summary| self.setup_appliance(summary)));
        match tokio::time::timeout(config.setup_total_timeout, setups).await {
            Ok(results) => {
                for result in results {
                    result?;
                }
            }
            Err(_) => warn!(
                budget_secs = config.setup_total_timeout.as_secs(),
                "appliance setup ran out of time, tracking the rest as placeholders"
            ),
        }

        for summary in &listing {
            let id = ApplianceId::from(summary.appliance_id.as_str());
            if !self.inner.store.contains(&id) {
                self.insert_setup_record(placeholder(summary));
            }
        }

        self.inner.store.mark_full_refresh(Utc::now());
        Ok(())
    }

    /// Fetch details and state for one listed appliance and insert it.
    /// Only rejected credentials are returned as errors; anything else
    /// degrades to a partial record or a placeholder.
    async fn setup_appliance(&self, summary: &ApplianceSummary) -> Result<(), CoreError> {
        let api = &self.inner.api;
        let budget = self.inner.config.setup_call_timeout;
        let id = ApplianceId::from(summary.appliance_id.as_str());

        let (details, state) = tokio::join!(
            with_timeout(budget, api.appliance_details(id.as_str())),
            with_timeout(budget, api.appliance_state(id.as_str())),
        );

        let details = match details {
            Ok(details) => details,
            Err(e) if e.requires_reauth() => return Err(e),
            Err(e) => {
                warn!(appliance = %id, error = %e, "details unavailable, tracking as placeholder");
                self.insert_setup_record(placeholder(summary));
                return Ok(());
            }
        };

        let mut record = ApplianceRecord::placeholder(
            id.clone(),
            summary.appliance_name.clone(),
            summary.appliance_type.clone(),
        );
        record.placeholder = false;
        record.model = details.appliance_info.model_or_pnc(id.as_str());
        record.brand = details.appliance_info.brand.clone();
        record.capabilities = details.capabilities;

        match state {
            Ok(state) => {
                record.connectivity = if state.is_disconnected() {
                    Connectivity::Disconnected
                } else {
                    Connectivity::Connected
                };
                record.reported = state.properties.reported;
                record.last_seen = Some(Utc::now());
            }
            Err(e) if e.requires_reauth() => return Err(e),
            Err(e) => {
                warn!(appliance = %id, error = %e, "initial state unavailable");
                record.connectivity =
                    Connectivity::from_vendor(summary.connection_state.as_deref());
            }
        }

        debug!(
            appliance = %id,
            family = record.family.as_deref().unwrap_or("?"),
            connectivity = %record.connectivity,
            "appliance set up"
        );
        self.insert_setup_record(record);
        Ok(())
    }

    /// A setup record may carry a different schema than the one cached
    /// from a previous run.
    fn insert_setup_record(&self, record: ApplianceRecord) {
        self.inner.resolver.invalidate_appliance(&record.id);
        self.inner.store.insert(record, UpdateSource::Setup);
    }

    // ── Refresh ──────────────────────────────────────────────────────

    /// Re-list appliances and pull state for every tracked one.
    ///
    /// Newly listed appliances are set up, unlisted ones pruned (offline
    /// ones are kept). Fails only if the listing fails, credentials are
    /// rejected, or every state fetch fails.
    pub async fn refresh_all(&self) -> Result<RefreshReport, CoreError> {
        let store = &self.inner.store;
        let budget = self.inner.config.state_fetch_timeout;

        let listing = match with_timeout(budget, self.inner.api.list_appliances()).await {
            Ok(listing) => listing,
            Err(e) => {
                self.note_failure(&e);
                return Err(e);
            }
        };

        let plan = store.apply_listing(&listing);
        for id in &plan.purged {
            self.inner.resolver.invalidate_appliance(id);
            self.inner.overlay.discard_appliance(id);
        }

        let added: Vec<ApplianceId> = plan
            .added
            .iter()
            .map(|s| ApplianceId::from(s.appliance_id.as_str()))
            .collect();
        for result in join_all(plan.added.iter().map(|s| self.setup_appliance(s))).await {
            if let Err(e) = result {
                self.note_failure(&e);
                return Err(e);
            }
        }

        let targets: Vec<ApplianceId> = store
            .ids()
            .into_iter()
            .filter(|id| !added.contains(id))
            .collect();
        let results = join_all(targets.iter().map(|id| self.refresh_appliance(id))).await;

        let mut failed = Vec::new();
        let mut reconnected = Vec::new();
        for (id, result) in targets.iter().zip(results) {
            match result {
                Ok(true) => reconnected.push(id.clone()),
                Ok(false) => {}
                Err(e) if e.requires_reauth() => {
                    self.note_failure(&e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(appliance = %id, error = %e, "state refresh failed, keeping last known state");
                    failed.push(id.clone());
                }
            }
        }

        if !targets.is_empty() && failed.len() == targets.len() {
            return Err(CoreError::TransientNetworkError {
                message: format!("state fetch failed for all {} appliances", failed.len()),
            });
        }

        let expired = self.inner.overlay.purge_expired();
        if expired > 0 {
            debug!(expired, "dropped unconfirmed optimistic values");
        }
        store.mark_full_refresh(Utc::now());

        if !reconnected.is_empty() {
            self.restart_push_after_reconnect().await;
        }

        info!(
            appliances = store.len(),
            added = added.len(),
            purged = plan.purged.len(),
            failed = failed.len(),
            "refresh complete"
        );
        Ok(RefreshReport {
            snapshot: store.snapshot(),
            added,
            purged: plan.purged,
            preserved: plan.preserved,
            failed,
            reconnected,
        })
    }

    /// Pull one appliance's state into the store, backfilling details
    /// first if it is still a placeholder. Returns `true` if the
    /// appliance came back online.
    pub async fn refresh_appliance(&self, id: &ApplianceId) -> Result<bool, CoreError> {
        let store = &self.inner.store;
        let budget = self.inner.config.state_fetch_timeout;
        let record = store
            .get(id)
            .ok_or_else(|| CoreError::ApplianceNotFound {
                appliance_id: id.clone(),
            })?;

        if record.placeholder {
            match with_timeout(budget, self.inner.api.appliance_details(id.as_str())).await {
                Ok(details) => {
                    if store.apply_details(id, &details) {
                        self.inner.resolver.invalidate_appliance(id);
                        info!(appliance = %id, "placeholder backfilled with details");
                    }
                }
                Err(e) if e.requires_reauth() => return Err(e),
                Err(e) => debug!(appliance = %id, error = %e, "details still unavailable"),
            }
        }

        let state = with_timeout(budget, self.inner.api.appliance_state(id.as_str())).await?;
        let connectivity = if state.is_disconnected() {
            Connectivity::Disconnected
        } else {
            Connectivity::Connected
        };
        let previous = store.set_connectivity(id, connectivity, UpdateSource::Pull);
        log_transition(id, previous, connectivity);

        self.absorb(id, &state.properties.reported, UpdateSource::Pull);
        Ok(previous == Some(Connectivity::Disconnected) && connectivity == Connectivity::Connected)
    }

    /// Manual sync: stop the listener, refresh everything, restart the
    /// listener. Rate limited per coordinator; a concurrent request waits
    /// for the running one and then hits the cooldown.
    pub async fn manual_sync(&self, appliance: &ApplianceId) -> Result<RefreshReport, CoreError> {
        self.ensure_running()?;
        if !self.inner.store.contains(appliance) {
            return Err(CoreError::ApplianceNotFound {
                appliance_id: appliance.clone(),
            });
        }

        let cooldown = self.inner.config.manual_sync_cooldown;
        let mut last = self.inner.last_manual_sync.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < cooldown {
                let remaining = cooldown - elapsed;
                let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                return Err(CoreError::SyncCooldown {
                    remaining_secs: secs.max(1),
                });
            }
        }
        *last = Some(Instant::now());

        info!(appliance = %appliance, "manual sync requested");
        self.stop_push().await;
        let result = self.refresh_all().await;
        if self.push_configured() {
            self.restart_push().await;
        }

        if let Err(e) = &result {
            warn!(error = %e, "manual sync failed");
        }
        result
    }

    // ── Live updates ─────────────────────────────────────────────────

    /// Merge a live partial update. Unknown appliances are ignored.
    pub async fn apply_push_update(
        &self,
        id: &ApplianceId,
        partial: &Map<String, Value>,
    ) -> Option<MergeOutcome> {
        if !self.inner.store.contains(id) {
            warn!(appliance = %id, "live update for unknown appliance, ignoring");
            return None;
        }

        let offline = partial
            .get("connectivityState")
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("disconnected"));
        let connectivity = if offline {
            Connectivity::Disconnected
        } else {
            Connectivity::Connected
        };
        let previous = self
            .inner
            .store
            .set_connectivity(id, connectivity, UpdateSource::Push);
        log_transition(id, previous, connectivity);

        let outcome = self.absorb(id, partial, UpdateSource::Push)?;

        let ending = partial
            .get("timeToEnd")
            .and_then(Value::as_f64)
            .is_some_and(|t| t > 0.0 && t <= 1.0);
        if ending {
            self.schedule_deferred_refresh(id).await;
        }

        debug!(
            appliance = %id,
            changed = outcome.changed.len(),
            revision = outcome.revision,
            "live update applied"
        );
        Some(outcome)
    }

    /// Route one decoded stream event into [`apply_push_update`](Self::apply_push_update).
    pub async fn apply_push_event(&self, event: &PushEvent) -> Option<MergeOutcome> {
        match event {
            PushEvent::Incremental {
                appliance_id,
                property,
                value,
            } => {
                let partial = PropertyPath::from(property.as_str()).nest(value.clone());
                self.apply_push_update(&ApplianceId::from(appliance_id.as_str()), &partial)
                    .await
            }
            PushEvent::Bulk {
                appliance_id,
                state,
            } => {
                self.apply_push_update(&ApplianceId::from(appliance_id.as_str()), state)
                    .await
            }
        }
    }

    /// Merge authoritative data, settle optimistic values it covers, and
    /// drop cached resolutions it affects.
    fn absorb(
        &self,
        id: &ApplianceId,
        partial: &Map<String, Value>,
        source: UpdateSource,
    ) -> Option<MergeOutcome> {
        let outcome = self
            .inner
            .store
            .merge_reported(id, partial, source, Utc::now())?;

        for path in leaf_paths(partial) {
            if let Some(value) = path.lookup(partial) {
                self.inner.overlay.observe(id, &path, value);
            }
        }
        self.inner.resolver.invalidate(id, &outcome.changed);
        Some(outcome)
    }

    async fn schedule_deferred_refresh(&self, id: &ApplianceId) {
        let config = &self.inner.config;
        let mut tasks = self.inner.deferred.lock().await;
        tasks.retain(|_, handle| !handle.is_finished());

        if let Some(previous) = tasks.remove(id) {
            previous.abort();
        }
        if tasks.len() >= config.max_deferred_refreshes {
            warn!(
                appliance = %id,
                pending = tasks.len(),
                "too many deferred refreshes pending, skipping"
            );
            return;
        }

        let cancel = self.inner.cancel_child.lock().await.clone();
        let delay = config.deferred_refresh_delay;
        let coordinator = self.clone();
        let target = id.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    debug!(appliance = %target, "running end-of-cycle refresh");
                    if let Err(e) = coordinator.refresh_appliance(&target).await {
                        warn!(appliance = %target, error = %e, "end-of-cycle refresh failed");
                    }
                }
            }
        });

        debug!(appliance = %id, delay_secs = delay.as_secs(), "end-of-cycle refresh scheduled");
        tasks.insert(id.clone(), handle);
    }

    fn push_configured(&self) -> bool {
        self.inner.config.push_enabled && self.inner.push_source.is_some()
    }

    /// Replace the running listener with a fresh one covering every
    /// tracked appliance. Returns the new listener's status, or `None`
    /// when nothing was started.
    async fn restart_push(&self) -> Option<watch::Receiver<StreamStatus>> {
        if !self.inner.config.push_enabled {
            return None;
        }
        let source = self.inner.push_source.clone()?;

        let mut guard = self.inner.push.lock().await;
        if let Some(previous) = guard.take() {
            previous.shutdown().await;
        }

        let parent = self.inner.cancel_child.lock().await.clone();
        if parent.is_cancelled() {
            return None;
        }

        let ids: Vec<String> = self
            .inner
            .store
            .ids()
            .iter()
            .map(ToString::to_string)
            .collect();
        if ids.is_empty() {
            debug!("no appliances tracked, live updates not started");
            return None;
        }

        let cancel = parent.child_token();
        let handle = PushHandle::start(
            source,
            ids,
            self.inner.config.reconnect.clone(),
            cancel.clone(),
        );
        let status = handle.status();
        let bridge = tokio::spawn(push_bridge_task(
            self.clone(),
            handle.subscribe(),
            handle.status(),
            cancel.clone(),
        ));

        *guard = Some(PushRuntime {
            handle,
            bridge,
            cancel,
        });
        *self.inner.last_push_restart.lock().await = Some(Instant::now());
        Some(status)
    }

    async fn stop_push(&self) {
        if let Some(runtime) = self.inner.push.lock().await.take() {
            runtime.shutdown().await;
            debug!("live updates stopped");
        }
    }

    /// Restart the listener after an appliance reconnected, at most once
    /// per cooldown.
    async fn restart_push_after_reconnect(&self) {
        let cooldown = self.inner.config.push_restart_cooldown;
        if let Some(at) = *self.inner.last_push_restart.lock().await {
            if at.elapsed() < cooldown {
                debug!("appliance reconnected, listener restarted recently, skipping");
                return;
            }
        }
        // Stopped for a manual sync, which restarts it itself.
        if self.inner.push.lock().await.is_none() {
            return;
        }

        info!("appliance reconnected, restarting live updates");
        self.restart_push().await;
    }

    // ── Credentials ──────────────────────────────────────────────────

    fn mark_reauth_required(&self, reason: &str) {
        let changed = self.inner.connection_state.send_if_modified(|state| {
            if *state == ConnectionState::ReauthRequired {
                false
            } else {
                *state = ConnectionState::ReauthRequired;
                true
            }
        });
        if changed {
            error!(reason, "re-authorization required");
        }
    }

    fn note_failure(&self, err: &CoreError) {
        if err.requires_reauth() {
            self.mark_reauth_required(&err.to_string());
        }
    }

    fn ensure_running(&self) -> Result<(), CoreError> {
        match *self.inner.connection_state.borrow() {
            ConnectionState::Running => Ok(()),
            ConnectionState::ReauthRequired => Err(CoreError::AuthenticationError {
                message: "credentials were rejected, re-authorize to continue".into(),
                reauth_required: true,
            }),
            _ => Err(CoreError::Disconnected),
        }
    }

    // ── Command execution ────────────────────────────────────────────

    /// Execute a command through the processor task.
    ///
    /// Commands are serialized: one vendor call at a time, no retries.
    pub async fn execute(&self, cmd: Command) -> Result<CommandOutcome, CoreError> {
        self.ensure_running()?;

        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
        let command_tx = self.inner.command_tx.lock().await.clone();

        command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx,
            })
            .await
            .map_err(|_| CoreError::Disconnected)?;

        response_rx.await.map_err(|_| CoreError::Disconnected)?
    }

    /// Convenience wrapper for [`Command::SetProperty`].
    pub async fn set_property(
        &self,
        appliance: ApplianceId,
        property: PropertyPath,
        value: Value,
    ) -> Result<CommandOutcome, CoreError> {
        self.execute(Command::SetProperty {
            appliance,
            property,
            value,
        })
        .await
    }

    async fn dispatch_set_property(
        &self,
        appliance: ApplianceId,
        property: PropertyPath,
        value: Value,
    ) -> Result<CommandOutcome, CoreError> {
        let record = self
            .inner
            .store
            .get(&appliance)
            .ok_or_else(|| CoreError::ApplianceNotFound {
                appliance_id: appliance.clone(),
            })?;

        let resolution = self.inner.resolver.resolve(&record, &property);
        let value = command::prepare(&record, &property, &resolution, value)?;
        let body = command::build_body(&record, &property, value.clone());

        debug!(appliance = %appliance, property = %property, value = %value, "sending command");
        if let Err(e) = self.inner.api.send_command(appliance.as_str(), &body).await {
            let err = rejection::classify(e, Some(resolution.step));
            self.note_failure(&err);
            warn!(appliance = %appliance, property = %property, error = %err, "command failed");
            return Err(err);
        }

        self.inner.overlay.record(&appliance, &property, value.clone());
        info!(appliance = %appliance, property = %property, value = %value, "command accepted");
        Ok(CommandOutcome {
            appliance,
            property,
            value,
        })
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: &ApplianceId) -> Option<Arc<ApplianceRecord>> {
        self.inner.store.get(id)
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<ApplianceRecord>>> {
        self.inner.store.snapshot()
    }

    pub fn appliances(&self) -> ApplianceStream {
        self.inner.store.subscribe()
    }

    pub fn watch_appliance(&self, id: &ApplianceId) -> Option<watch::Receiver<Arc<ApplianceRecord>>> {
        self.inner.store.watch_appliance(id)
    }

    pub fn changes(&self) -> broadcast::Receiver<Arc<StateChange>> {
        self.inner.store.changes()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Effective value and constraints for one property under the active
    /// program. Pending optimistic values show through unless the program
    /// disables the control.
    pub fn resolve(&self, id: &ApplianceId, property: &PropertyPath) -> Result<Resolution, CoreError> {
        let record = self
            .inner
            .store
            .get(id)
            .ok_or_else(|| CoreError::ApplianceNotFound {
                appliance_id: id.clone(),
            })?;

        let mut resolution = self.inner.resolver.resolve(&record, property);
        if !resolution.is_program_disabled() {
            resolution.value = self
                .inner
                .overlay
                .overlay(id, property, resolution.value.take());
        }
        Ok(resolution)
    }

    /// `(hits, misses)` of the resolution cache.
    pub fn resolver_stats(&self) -> (u64, u64) {
        self.inner.resolver.cache_stats()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

async fn with_timeout<T>(
    budget: Duration,
    call: impl Future<Output = Result<T, applisync_api::Error>>,
) -> Result<T, CoreError> {
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result.map_err(CoreError::from),
        Err(_) => Err(CoreError::Timeout {
            timeout_secs: budget.as_secs(),
        }),
    }
}

fn placeholder(summary: &ApplianceSummary) -> ApplianceRecord {
    ApplianceRecord::placeholder(
        ApplianceId::from(summary.appliance_id.as_str()),
        summary.appliance_name.clone(),
        summary.appliance_type.clone(),
    )
}

fn log_transition(id: &ApplianceId, previous: Option<Connectivity>, now: Connectivity) {
    match (previous, now) {
        (Some(Connectivity::Disconnected), Connectivity::Connected) => {
            info!(appliance = %id, "appliance back online");
        }
        (Some(Connectivity::Connected), Connectivity::Disconnected) => {
            info!(appliance = %id, "appliance went offline");
        }
        _ => {}
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Periodically refresh everything.
async fn refresh_task(coordinator: Coordinator, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = coordinator.refresh_all().await {
                    warn!(error = %e, "periodic refresh failed");
                }
            }
        }
    }
}

/// Process commands from the mpsc channel, routing each to the vendor.
async fn command_processor_task(
    coordinator: Coordinator,
    mut rx: mpsc::Receiver<CommandEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = match envelope.command {
                    Command::SetProperty { appliance, property, value } => {
                        coordinator.dispatch_set_property(appliance, property, value).await
                    }
                };
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

/// Forward listener events into the store and watch its status.
async fn push_bridge_task(
    coordinator: Coordinator,
    mut events: broadcast::Receiver<Arc<PushEvent>>,
    mut status: watch::Receiver<StreamStatus>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                match current {
                    StreamStatus::AuthFailed => {
                        coordinator.mark_reauth_required("live update stream rejected credentials");
                    }
                    StreamStatus::Connected => debug!("live updates connected"),
                    StreamStatus::Reconnecting { attempt } => debug!(attempt, "live updates reconnecting"),
                    StreamStatus::Connecting | StreamStatus::Stopped => {}
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    coordinator.apply_push_event(&event).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "live update consumer fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Restart the listener on a fixed period. Repeated failures to come back
/// up trigger a longer pause before trying again.
async fn push_renewal_task(coordinator: Coordinator, cancel: CancellationToken) {
    let config = coordinator.inner.config.clone();
    let mut ticker = tokio::time::interval(config.push_renewal_interval);
    ticker.tick().await;
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        debug!("renewing live update session");
        let connected = match coordinator.restart_push().await {
            Some(status) => wait_for_connected(status, config.push_connect_timeout).await,
            None => true,
        };
        if connected {
            failures = 0;
            continue;
        }

        failures += 1;
        warn!(failures, "live update renewal did not connect");
        if failures >= config.push_renewal_failure_limit {
            error!(
                failures,
                backoff_secs = config.push_renewal_backoff.as_secs(),
                "live update renewal keeps failing, backing off"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(config.push_renewal_backoff) => {}
            }
            failures = 0;
        }
    }
}

async fn wait_for_connected(mut status: watch::Receiver<StreamStatus>, budget: Duration) -> bool {
    let settled = status.wait_for(|s| {
        matches!(
            s,
            StreamStatus::Connected | StreamStatus::AuthFailed | StreamStatus::Stopped
        )
    });
    match tokio::time::timeout(budget, settled).await {
        Ok(Ok(state)) => *state == StreamStatus::Connected,
        _ => false,
    }
}

/// Follow the credential manager's re-authorization flag.
async fn reauth_watch_task(
    coordinator: Coordinator,
    mut required: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    if *required.borrow_and_update() {
        coordinator.mark_reauth_required("credential renewal was rejected");
    }

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = required.changed() => {
                if changed.is_err() {
                    break;
                }
                if *required.borrow_and_update() {
                    coordinator.mark_reauth_required("credential renewal was rejected");
                } else {
                    let restored = coordinator.inner.connection_state.send_if_modified(|state| {
                        if *state == ConnectionState::ReauthRequired {
                            *state = ConnectionState::Running;
                            true
                        } else {
                            false
                        }
                    });
                    if restored {
                        info!("credentials restored, resuming");
                    }
                }
            }
        }
    }
}
