//! The request-routing state machine.
//!
//! One [`Router`] owns all mutable routing state: the believed owner of
//! the shared backend pipe, the fingerprint→backend mappings, the merged
//! key list, and the failure cache.  Every externally observable
//! operation (dispatching a client frame, a manual switch, a rescan)
//! takes the single exclusive lock for its full duration, switches and
//! retries included.  Pipe ownership is a singleton resource; pipelining
//! concurrent switches is ill-defined, so a slow sign (waiting for the
//! user to unlock a vault) intentionally blocks other agent operations.
//!
//! The router never surfaces an error to a client: every handled message
//! resolves to a well-formed frame.  The one exception is a malformed
//! *client* payload, which the server answers by closing that connection.

use std::sync::Arc;
use std::time::Duration;

use agentmux_core::config::ConfigStore;
use agentmux_core::failure::FailureCache;
use agentmux_core::fingerprint::fingerprint;
use agentmux_core::hosthint;
use agentmux_core::mapping::MappingStore;
use agentmux_core::{BackendSpec, Error, Identity, Result};
use agentmux_wire::codec::{
    self, encode_identities_answer, encode_sign_response, SignRequest,
};
use agentmux_wire::message::{SSH_AGENT_IDENTITIES_ANSWER, SSH_AGENT_SIGN_RESPONSE};
use agentmux_wire::{Frame, MessageKind};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::Connector;
use crate::detect::detect_current;
use crate::process::ProcessControl;
use crate::ui::{HintProvider, KeySelector};

/// How long a freshly launched backend gets before its pipe is probed.
const SWITCH_STARTUP_WAIT: Duration = Duration::from_secs(3);

/// List-identities polling that forces an unlock-on-list backend to
/// prompt: attempts and spacing.
const UNLOCK_POLL_ATTEMPTS: u32 = 10;
const UNLOCK_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Sign retries after a switch, while the user may be authenticating.
const SIGN_RETRY_ATTEMPTS: u32 = 5;
const SIGN_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Per-connection context the proxy server hands to the router.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientContext {
    /// Peer process id, when the pipe API could supply it.
    pub peer_pid: Option<u32>,
}

/// Point-in-time view of the router, for the tray UI and diagnostics.
#[derive(Debug, Clone)]
pub struct RouterStatus {
    pub current_backend: Option<String>,
    pub cached_keys: usize,
    pub mapped_keys: usize,
    pub keys_scanned: bool,
    pub failed_entries: usize,
}

struct RouterState {
    config: ConfigStore,
    backends: Vec<BackendSpec>,
    current_backend: Option<String>,
    mappings: MappingStore,
    all_keys: Vec<Identity>,
    keys_scanned: bool,
    failures: FailureCache,
}

pub struct Router {
    state: Mutex<RouterState>,
    connector: Arc<dyn Connector>,
    process: Arc<dyn ProcessControl>,
    selector: Arc<dyn KeySelector>,
    hints: Arc<dyn HintProvider>,
    cancel: CancellationToken,
}

impl Router {
    /// Build the router from persisted state and detect the current pipe
    /// owner from running processes.
    ///
    /// Detection never touches the pipe itself: probing it can pop an
    /// unlock dialog on a backend that prompts on list.
    pub async fn start(
        config: ConfigStore,
        connector: Arc<dyn Connector>,
        process: Arc<dyn ProcessControl>,
        selector: Arc<dyn KeySelector>,
        hints: Arc<dyn HintProvider>,
        cancel: CancellationToken,
    ) -> Self {
        let backends = config.config().backends();
        let (mappings, cached) = MappingStore::from_entries(&config.config().key_mappings);

        let mut all_keys: Vec<Identity> = Vec::with_capacity(cached.len());
        for identity in cached {
            let fp = identity.fingerprint();
            if !all_keys.iter().any(|existing| existing.fingerprint() == fp) {
                all_keys.push(identity);
            }
        }

        // Mappings that already span several backends prove a full scan
        // happened before; skipping the cold scan avoids gratuitously
        // waking a backend that demands unlock just to list.
        let keys_scanned = mappings.distinct_backends() >= 2;

        let current_backend = detect_current(&backends, process.as_ref()).await;
        info!(
            agents = backends.len(),
            cached_keys = all_keys.len(),
            keys_scanned,
            current = current_backend.as_deref().unwrap_or("unknown"),
            "router ready"
        );

        let ttl = Duration::from_secs(config.config().failure_cache_ttl_seconds);
        Self {
            state: Mutex::new(RouterState {
                config,
                backends,
                current_backend,
                mappings,
                all_keys,
                keys_scanned,
                failures: FailureCache::new(ttl),
            }),
            connector,
            process,
            selector,
            hints,
            cancel,
        }
    }

    /// Handle one client frame and produce the response frame.
    ///
    /// `Err` is returned only for a malformed client payload; the server
    /// closes that connection.  Everything else, cancellation and backend
    /// failures included, resolves to a protocol frame.
    pub async fn dispatch(&self, frame: Frame, ctx: &ClientContext) -> Result<Frame> {
        let mut state = self.state.lock().await;

        if self.cancel.is_cancelled() {
            return Ok(Frame::failure());
        }

        let result = match frame.kind() {
            MessageKind::RequestIdentities => self.handle_list(&mut state, ctx).await,
            MessageKind::SignRequest => {
                let request = codec::parse_sign_request(&frame.payload)?;
                self.handle_sign(&mut state, &request).await
            }
            _ => self.handle_forward(&frame).await,
        };

        match result {
            Ok(frame) => Ok(frame),
            Err(Error::Cancelled) => {
                debug!("request abandoned by shutdown");
                Ok(Frame::failure())
            }
            Err(e) => {
                warn!("request failed: {e}");
                Ok(Frame::failure())
            }
        }
    }

    /// Manually make `name` the pipe owner.
    ///
    /// Terminates *all* configured backends, launches the target, and,
    /// when `start_others` is set, brings the remaining backends back up
    /// afterwards (they will not steal the pipe unless they are the
    /// stealing kind).
    pub async fn switch_to(&self, name: &str, force: bool, start_others: bool) -> Result<()> {
        let mut state = self.state.lock().await;

        if !force && state.current_backend.as_deref() == Some(name) {
            debug!(backend = %name, "already current, not switching");
            return Ok(());
        }

        let spec = find_backend(&state.backends, name)
            .ok_or_else(|| Error::ProcessControl(format!("unknown agent '{name}'")))?
            .clone();
        self.full_switch(&mut state, &spec, start_others).await
    }

    /// Snapshot the routing state.
    pub async fn status(&self) -> RouterStatus {
        let state = self.state.lock().await;
        RouterStatus {
            current_backend: state.current_backend.clone(),
            cached_keys: state.all_keys.len(),
            mapped_keys: state.mappings.len(),
            keys_scanned: state.keys_scanned,
            failed_entries: state.failures.len(),
        }
    }

    /// Drop the merged key list and redo the scan from live backends.
    pub async fn rescan(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        state.all_keys.clear();
        state.keys_scanned = false;
        let keys = self.merged_scan(&mut state).await?;
        Ok(keys.len())
    }

    // -----------------------------------------------------------------------
    // Identity listing
    // -----------------------------------------------------------------------

    async fn handle_list(&self, state: &mut RouterState, ctx: &ClientContext) -> Result<Frame> {
        let candidates = if state.keys_scanned && !state.all_keys.is_empty() {
            state.all_keys.clone()
        } else if state.backends.len() == 1 {
            self.single_backend_list(state).await?
        } else {
            self.merged_scan(state).await?
        };

        if candidates.is_empty() {
            debug!("no identities available");
            return Ok(Frame::failure());
        }

        let ordered = self.reorder(state, candidates, ctx).await;
        Ok(Frame::new(
            SSH_AGENT_IDENTITIES_ANSWER,
            encode_identities_answer(&ordered),
        ))
    }

    /// With one configured backend the listing is a plain pass-through;
    /// the result is still recorded so later requests skip the pipe.
    async fn single_backend_list(&self, state: &mut RouterState) -> Result<Vec<Identity>> {
        let spec = state.backends[0].clone();
        match self.connector.connect().await {
            Ok(mut client) => {
                let listed = client.request_identities().await?;
                let changed = record_scan(state, &spec.name, &listed);
                state.keys_scanned = true;
                if changed {
                    persist(state);
                }
                Ok(state.all_keys.clone())
            }
            Err(_) => {
                debug!(backend = %spec.name, "backend unreachable for listing");
                Ok(Vec::new())
            }
        }
    }

    /// Merged scan: walk the backends in priority order, make sure each
    /// is running, list it, and fold new keys into the merged set.  Newly
    /// discovered keys are attributed to the backend that first produced
    /// them and persisted immediately.
    async fn merged_scan(&self, state: &mut RouterState) -> Result<Vec<Identity>> {
        let backends = state.backends.clone();
        let mut changed = false;

        for spec in &backends {
            if !self.process.is_running(&spec.process_name).await {
                if let Err(e) = self
                    .process
                    .launch_detached(&spec.process_name, &spec.exe_path)
                    .await
                {
                    warn!(backend = %spec.name, "scan launch failed: {e}");
                    continue;
                }
                self.sleep(SWITCH_STARTUP_WAIT).await?;
            }

            let listed = match self.connector.connect().await {
                Ok(mut client) => client.request_identities().await.unwrap_or_default(),
                Err(_) => {
                    debug!(backend = %spec.name, "backend unreachable during scan");
                    continue;
                }
            };

            if !listed.is_empty() && state.current_backend.is_none() {
                state.current_backend = Some(spec.name.clone());
            }
            changed |= record_scan(state, &spec.name, &listed);
        }

        state.keys_scanned = true;
        if changed {
            persist(state);
        }
        Ok(state.all_keys.clone())
    }

    /// Reorder (never filter) by host hint; fall back to the interactive
    /// selection dialog when several keys from several backends are on
    /// offer and no hint decided.
    async fn reorder(
        &self,
        state: &RouterState,
        mut candidates: Vec<Identity>,
        ctx: &ClientContext,
    ) -> Vec<Identity> {
        if let Some(pid) = ctx.peer_pid {
            if let Some(hint) = self.hints.hint_for_pid(pid).await {
                let hints = &state.config.config().host_key_mappings;
                if let Some(entry) = hosthint::first_match(hints, &hint) {
                    debug!(pattern = %entry.pattern, fingerprint = %entry.fingerprint, "host hint matched");
                    if let Some(pos) = candidates
                        .iter()
                        .position(|id| id.fingerprint() == entry.fingerprint)
                    {
                        let preferred = candidates.remove(pos);
                        candidates.insert(0, preferred);
                    }
                    return candidates;
                }
            }
        }

        if candidates.len() > 1 && state.backends.len() > 1 && self.selector.interactive() {
            let timeout =
                Duration::from_secs(state.config.config().key_selection_timeout_seconds);
            match self.selector.select(&candidates, timeout).await {
                Some(subset) if !subset.is_empty() => return subset,
                _ => debug!("selection dialog cancelled or unavailable"),
            }
        }

        candidates
    }

    // -----------------------------------------------------------------------
    // Signing
    // -----------------------------------------------------------------------

    async fn handle_sign(&self, state: &mut RouterState, request: &SignRequest) -> Result<Frame> {
        let fp = fingerprint(&request.key_blob);
        self.refresh_current(state).await;

        let mapped = state.mappings.get(&fp).map(str::to_string);
        let target = mapped
            .clone()
            .or_else(|| state.current_backend.clone())
            .or_else(|| state.config.config().default_backend());

        let Some(target) = target else {
            warn!("sign request with no configured backends");
            return Ok(Frame::failure());
        };

        debug!(
            fingerprint = %fp,
            target = %target,
            mapped = mapped.is_some(),
            current = state.current_backend.as_deref().unwrap_or("unknown"),
            "routing sign request"
        );

        let signature = if state.current_backend.as_deref() == Some(target.as_str()) {
            self.sign_on_current(state, &fp, request, &target, mapped.is_some())
                .await?
        } else {
            self.sign_with_switch(state, &fp, request, &target, mapped.is_some())
                .await?
        };

        Ok(match signature {
            Some(sig) => Frame::new(SSH_AGENT_SIGN_RESPONSE, encode_sign_response(&sig)),
            None => Frame::failure(),
        })
    }

    /// Step A: the target already owns the pipe.
    async fn sign_on_current(
        &self,
        state: &mut RouterState,
        fp: &str,
        request: &SignRequest,
        target: &str,
        mapped: bool,
    ) -> Result<Option<Vec<u8>>> {
        let spec = match find_backend(&state.backends, target) {
            Some(spec) => spec.clone(),
            None => {
                warn!(backend = %target, "mapped backend is no longer configured");
                return if mapped {
                    Ok(None)
                } else {
                    self.sign_fallback(state, fp, request, &[target.to_string()])
                        .await
                };
            }
        };

        if state.failures.is_cached(fp, target) {
            debug!(backend = %target, "skipping backend with cached connection failure");
        } else {
            match self.try_sign_once(request).await {
                Ok(sig) => {
                    self.record_success(state, fp, target, request);
                    return Ok(Some(sig));
                }
                Err(Error::SignRefused) => {
                    debug!(backend = %target, "sign refused on current backend");
                }
                Err(Error::NotConnected) => {
                    let mut reached = false;
                    if !spec.unlock_on_list {
                        // The pipe can end up orphaned: another backend
                        // exited and this one never reacquired.  A restart
                        // makes it re-bind.
                        info!(backend = %target, "pipe looks orphaned, restarting backend");
                        if let Err(e) = self.process.terminate(&spec.process_name).await {
                            warn!(backend = %target, "terminate failed: {e}");
                        }
                        if let Err(e) = self
                            .process
                            .launch_detached(&spec.process_name, &spec.exe_path)
                            .await
                        {
                            warn!(backend = %target, "relaunch failed: {e}");
                        }
                        self.sleep(SWITCH_STARTUP_WAIT).await?;

                        match self.try_sign_once(request).await {
                            Ok(sig) => {
                                self.record_success(state, fp, target, request);
                                return Ok(Some(sig));
                            }
                            Err(Error::SignRefused) => reached = true,
                            Err(Error::NotConnected) => {}
                            Err(e) => return Err(e),
                        }
                    }

                    if !reached {
                        state.failures.mark_failed(fp, target);
                        if !self.process.is_running(&spec.process_name).await {
                            // No process either: the owner is genuinely
                            // unknown until the next detection pass.
                            state.current_backend = None;
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if mapped {
            Ok(None)
        } else {
            self.sign_fallback(state, fp, request, &[target.to_string()])
                .await
        }
    }

    /// Step B: the target differs from the current owner.  Partial
    /// switch, coax the unlock prompt, then retry while the user
    /// authenticates.
    async fn sign_with_switch(
        &self,
        state: &mut RouterState,
        fp: &str,
        request: &SignRequest,
        target: &str,
        mapped: bool,
    ) -> Result<Option<Vec<u8>>> {
        let spec = match find_backend(&state.backends, target) {
            Some(spec) => spec.clone(),
            None => {
                warn!(backend = %target, "mapped backend is no longer configured");
                return if mapped {
                    Ok(None)
                } else {
                    self.sign_fallback(state, fp, request, &[target.to_string()])
                        .await
                };
            }
        };

        if state.failures.is_cached(fp, target) {
            debug!(backend = %target, "skipping backend with cached connection failure");
        } else {
            self.partial_switch(state, &spec).await?;
            self.trigger_unlock(&spec).await?;

            for attempt in 1..=SIGN_RETRY_ATTEMPTS {
                match self.try_sign_once(request).await {
                    Ok(sig) => {
                        self.record_success(state, fp, target, request);
                        return Ok(Some(sig));
                    }
                    Err(Error::NotConnected) => {
                        state.failures.mark_failed(fp, target);
                        break;
                    }
                    Err(Error::SignRefused) => {
                        info!(
                            backend = %target,
                            attempt,
                            "sign refused, waiting for user authentication"
                        );
                        if attempt < SIGN_RETRY_ATTEMPTS {
                            self.sleep(SIGN_RETRY_INTERVAL).await?;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if mapped {
            // The user asked for this backend by mapping; trying others
            // would sign with the wrong identity.
            Ok(None)
        } else {
            self.sign_fallback(state, fp, request, &[target.to_string()])
                .await
        }
    }

    /// Step C: unmapped fingerprint and the chosen backend failed.  Try
    /// the remaining backends in priority order, full switch each time.
    async fn sign_fallback(
        &self,
        state: &mut RouterState,
        fp: &str,
        request: &SignRequest,
        exclude: &[String],
    ) -> Result<Option<Vec<u8>>> {
        let backends = state.backends.clone();
        for spec in backends
            .iter()
            .filter(|spec| !exclude.contains(&spec.name))
        {
            if state.failures.is_cached(fp, &spec.name) {
                debug!(backend = %spec.name, "skipping backend with cached connection failure");
                continue;
            }

            info!(backend = %spec.name, fingerprint = %fp, "trying fallback backend");
            self.full_switch(state, spec, false).await?;

            match self.try_sign_once(request).await {
                Ok(sig) => {
                    self.record_success(state, fp, &spec.name, request);
                    return Ok(Some(sig));
                }
                Err(Error::SignRefused) => {
                    debug!(backend = %spec.name, "fallback backend refused");
                }
                Err(Error::NotConnected) => {
                    state.failures.mark_failed(fp, &spec.name);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Switching
    // -----------------------------------------------------------------------

    /// Terminate only the current owner, launch the target, give it time
    /// to come up, and adopt it as current.
    async fn partial_switch(&self, state: &mut RouterState, spec: &BackendSpec) -> Result<()> {
        if let Some(current) = state.current_backend.clone() {
            if current != spec.name {
                if let Some(cur_spec) = find_backend(&state.backends, &current) {
                    let process_name = cur_spec.process_name.clone();
                    info!(from = %current, to = %spec.name, "partial switch");
                    if let Err(e) = self.process.terminate(&process_name).await {
                        warn!(backend = %current, "terminate failed: {e}");
                    }
                }
                state.current_backend = None;
            }
        } else {
            info!(to = %spec.name, "activating backend");
        }

        if let Err(e) = self
            .process
            .launch_detached(&spec.process_name, &spec.exe_path)
            .await
        {
            warn!(backend = %spec.name, "launch failed: {e}");
        }
        self.sleep(SWITCH_STARTUP_WAIT).await?;
        state.current_backend = Some(spec.name.clone());
        Ok(())
    }

    /// Terminate every configured backend, launch the target, optionally
    /// bring the rest back up afterwards.
    async fn full_switch(
        &self,
        state: &mut RouterState,
        spec: &BackendSpec,
        start_others: bool,
    ) -> Result<()> {
        info!(to = %spec.name, "full switch");
        state.current_backend = None;

        let backends = state.backends.clone();
        for backend in &backends {
            if let Err(e) = self.process.terminate(&backend.process_name).await {
                warn!(backend = %backend.name, "terminate failed: {e}");
            }
        }

        if let Err(e) = self
            .process
            .launch_detached(&spec.process_name, &spec.exe_path)
            .await
        {
            warn!(backend = %spec.name, "launch failed: {e}");
        }
        self.sleep(SWITCH_STARTUP_WAIT).await?;
        state.current_backend = Some(spec.name.clone());

        if start_others {
            for backend in backends.iter().filter(|b| b.name != spec.name) {
                if let Err(e) = self
                    .process
                    .launch_detached(&backend.process_name, &backend.exe_path)
                    .await
                {
                    warn!(backend = %backend.name, "launch failed: {e}");
                }
            }
        }
        Ok(())
    }

    /// Poll list-identities until the backend produces keys.  Backends
    /// that prompt for unlock on list fire their dialog on the first
    /// poll; the remaining polls just wait for the user.
    async fn trigger_unlock(&self, spec: &BackendSpec) -> Result<()> {
        for attempt in 1..=UNLOCK_POLL_ATTEMPTS {
            if let Ok(mut client) = self.connector.connect().await {
                match client.request_identities().await {
                    Ok(identities) if !identities.is_empty() => {
                        debug!(backend = %spec.name, attempt, "backend unlocked");
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => debug!(backend = %spec.name, "unlock poll failed: {e}"),
                }
            }
            if attempt < UNLOCK_POLL_ATTEMPTS {
                self.sleep(UNLOCK_POLL_INTERVAL).await?;
            }
        }
        warn!(backend = %spec.name, "backend produced no identities during unlock polling");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Refresh `current_backend` from running processes.  Detection only
    /// overrides an existing belief when it has a positive answer, or
    /// when the believed owner's process is gone.
    async fn refresh_current(&self, state: &mut RouterState) {
        match detect_current(&state.backends, self.process.as_ref()).await {
            Some(owner) => {
                if state.current_backend.as_deref() != Some(owner.as_str()) {
                    debug!(owner = %owner, "detected pipe owner from processes");
                    state.current_backend = Some(owner);
                }
            }
            None => {
                if let Some(current) = state.current_backend.clone() {
                    if let Some(spec) = find_backend(&state.backends, &current) {
                        if !self.process.is_running(&spec.process_name).await {
                            debug!(backend = %current, "believed owner is not running");
                            state.current_backend = None;
                        }
                    }
                }
            }
        }
    }

    /// One connect + sign round trip on a fresh client.
    async fn try_sign_once(&self, request: &SignRequest) -> Result<Vec<u8>> {
        let mut client = self.connector.connect().await.map_err(|e| match e {
            Error::Cancelled => Error::Cancelled,
            _ => Error::NotConnected,
        })?;
        match client
            .sign(&request.key_blob, &request.data, request.flags)
            .await
        {
            Ok(Some(signature)) => Ok(signature),
            Ok(None) => Err(Error::SignRefused),
            // A garbled or dropped conversation counts as a connection
            // failure for caching purposes.
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(_) => Err(Error::NotConnected),
        }
    }

    /// A sign succeeded: persist the mapping (blob and comment included)
    /// and clear any stale failure-cache entry.
    fn record_success(&self, state: &mut RouterState, fp: &str, backend: &str, request: &SignRequest) {
        state.failures.clear(fp, backend);

        let comment = state
            .all_keys
            .iter()
            .find(|identity| identity.fingerprint() == fp)
            .map(|identity| identity.comment.clone());
        let changed = state.mappings.put(
            fp,
            backend,
            Some(&request.key_blob),
            comment.as_deref(),
        );
        if changed {
            persist(state);
        }
    }

    /// Cancellation-aware sleep: the exclusive lock is never held across
    /// a wait that cannot observe shutdown.
    async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// One-shot proxying for message types the router does not interpret.
    async fn handle_forward(&self, frame: &Frame) -> Result<Frame> {
        match self.connector.connect().await {
            Ok(mut client) => match client.forward(frame).await {
                Ok(Some(response)) => Ok(response),
                Ok(None) => Ok(Frame::failure()),
                Err(e) => {
                    debug!("opaque forward failed: {e}");
                    Ok(Frame::failure())
                }
            },
            Err(_) => Ok(Frame::failure()),
        }
    }
}

/// Fold a backend's listing into the merged set.  Returns whether any
/// mapping changed and needs persisting.
fn record_scan(state: &mut RouterState, backend: &str, listed: &[Identity]) -> bool {
    let mut changed = false;
    for identity in listed {
        let fp = identity.fingerprint();
        if !state
            .all_keys
            .iter()
            .any(|existing| existing.fingerprint() == fp)
        {
            state.all_keys.push(identity.clone());
        }
        if !state.mappings.contains(&fp) {
            debug!(fingerprint = %fp, backend, "discovered key");
            changed |= state.mappings.put(
                &fp,
                backend,
                Some(&identity.key_blob),
                Some(&identity.comment),
            );
        }
    }
    changed
}

/// Best-effort persistence: the in-memory state stays authoritative even
/// when the write fails.
fn persist(state: &mut RouterState) {
    let entries = state.mappings.to_entries();
    state.config.config_mut().key_mappings = entries;
    if let Err(e) = state.config.save() {
        warn!("failed to persist key mappings: {e}");
    }
}

fn find_backend<'a>(backends: &'a [BackendSpec], name: &str) -> Option<&'a BackendSpec> {
    backends.iter().find(|spec| spec.name == name)
}
