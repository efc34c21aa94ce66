// ── Credential lifecycle ──
//
// Owns the access/refresh token pair for one account. Every request path
// asks `ensure_valid()` for a token; 401 handlers call `force_refresh()`.
// Both funnel into the same renewal mutex, so at most one renewal call is
// ever in flight and queued callers reuse its result.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::Error;

// ── Credential set ───────────────────────────────────────────────────

/// The token material for one authorized account.
#[derive(Clone)]
pub struct CredentialSet {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Vendor API key, sent as `x-api-key` alongside the bearer token.
    pub client_id: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl CredentialSet {
    /// Build a credential set from stored material.
    ///
    /// When `expires_at` is unknown the access token's JWT `exp` claim is
    /// used. A token that cannot be decoded is treated as already expired.
    pub fn new(
        access_token: SecretString,
        refresh_token: SecretString,
        client_id: SecretString,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let expires_at = expires_at
            .or_else(|| jwt_expiry(access_token.expose_secret()))
            .unwrap_or(DateTime::UNIX_EPOCH);
        Self {
            access_token,
            refresh_token,
            client_id,
            expires_at,
        }
    }

    /// `true` once `now` has passed the absolute expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// `true` when the token expires within `margin` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = TimeDelta::from_std(margin).unwrap_or(TimeDelta::MAX);
        self.expires_at
            .checked_sub_signed(margin)
            .is_none_or(|deadline| now >= deadline)
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("client_id", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct ExpiryClaims {
    exp: i64,
}

/// Read the `exp` claim of a JWT without verifying its signature.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    match decode::<ExpiryClaims>(token, &DecodingKey::from_secret(b""), &validation) {
        Ok(data) => DateTime::from_timestamp(data.claims.exp, 0),
        Err(e) => {
            debug!(error = %e, "access token has no readable exp claim");
            None
        }
    }
}

// ── Collaborator seams ───────────────────────────────────────────────

/// Fresh token material returned by the vendor's renewal endpoint.
pub struct TokenGrant {
    pub access_token: SecretString,
    /// Some vendors rotate the refresh token on every renewal.
    pub refresh_token: Option<SecretString>,
    pub expires_in: Option<Duration>,
}

/// Performs the network half of a renewal.
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    async fn renew(
        &self,
        refresh_token: &SecretString,
        client_id: &SecretString,
    ) -> Result<TokenGrant, Error>;
}

/// Durable storage for renewed credentials.
#[async_trait]
pub trait CredentialSink: Send + Sync {
    async fn persist(&self, credentials: &CredentialSet) -> Result<(), Error>;
}

// ── Policy ───────────────────────────────────────────────────────────

/// Timing knobs for renewal.
#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    /// Renew once the token is this close to expiry.
    pub safety_margin: Duration,
    /// Validity assumed when the grant omits `expiresIn`.
    pub default_validity: Duration,
    /// Network attempts per renewal before giving up.
    pub max_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    /// Pause proactive renewal after a failed one; doubles per failure.
    pub cooldown_initial: Duration,
    pub cooldown_max: Duration,
    /// Consecutive failed renewals that escalate to re-authorization.
    pub reauth_after_failures: u32,
    /// Wall-clock drift between two checks that is worth a warning.
    pub clock_jump_threshold: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(900),
            default_validity: Duration::from_secs(43_200),
            max_attempts: 3,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            cooldown_initial: Duration::from_secs(60),
            cooldown_max: Duration::from_secs(300),
            reauth_after_failures: 5,
            clock_jump_threshold: Duration::from_secs(3600),
        }
    }
}

impl RenewalPolicy {
    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_initial_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }

    fn cooldown(&self, consecutive_failures: u32) -> Duration {
        let factor = 2_u32.saturating_pow(consecutive_failures.saturating_sub(1));
        self.cooldown_initial
            .saturating_mul(factor)
            .min(self.cooldown_max)
    }
}

// ── Manager ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RenewState {
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

/// Keeps one credential set fresh under concurrent use.
pub struct CredentialManager {
    current: ArcSwap<CredentialSet>,
    generation: AtomicU64,
    renew_lock: Mutex<RenewState>,
    renewer: Arc<dyn TokenRenewer>,
    sink: Option<Arc<dyn CredentialSink>>,
    policy: RenewalPolicy,
    reauth_tx: watch::Sender<bool>,
    clock_origin: Instant,
    last_check_wall_ms: AtomicI64,
    last_check_mono_ms: AtomicI64,
}

impl CredentialManager {
    pub fn new(
        initial: CredentialSet,
        renewer: Arc<dyn TokenRenewer>,
        sink: Option<Arc<dyn CredentialSink>>,
        policy: RenewalPolicy,
    ) -> Self {
        let (reauth_tx, _) = watch::channel(false);
        Self {
            current: ArcSwap::from_pointee(initial),
            generation: AtomicU64::new(0),
            renew_lock: Mutex::new(RenewState::default()),
            renewer,
            sink,
            policy,
            reauth_tx,
            clock_origin: Instant::now(),
            last_check_wall_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            last_check_mono_ms: AtomicI64::new(0),
        }
    }

    /// The cached credential set, without any validity check.
    pub fn current(&self) -> Arc<CredentialSet> {
        self.current.load_full()
    }

    /// Monotonic counter bumped by every successful renewal.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Flips to `true` when renewal can no longer succeed without the user.
    pub fn reauth_required(&self) -> watch::Receiver<bool> {
        self.reauth_tx.subscribe()
    }

    pub fn policy(&self) -> &RenewalPolicy {
        &self.policy
    }

    /// Return a credential set that is valid beyond the safety margin,
    /// renewing first if necessary.
    pub async fn ensure_valid(&self) -> Result<Arc<CredentialSet>, Error> {
        Ok(self.ensure_valid_tracked().await?.1)
    }

    /// [`ensure_valid`](Self::ensure_valid) plus the generation the
    /// returned set belongs to, for a later
    /// [`force_refresh_from`](Self::force_refresh_from).
    ///
    /// The generation is never newer than the set, so a refresh keyed on
    /// it cannot skip past a renewal the caller has not seen.
    pub async fn ensure_valid_tracked(&self) -> Result<(u64, Arc<CredentialSet>), Error> {
        self.observe_clock();

        // Generation first: a renewal landing between the two loads must
        // be visible to `renew` as a generation change.
        let seen = self.generation();
        let current = self.current.load_full();
        if !current.expires_within(Utc::now(), self.policy.safety_margin) {
            return Ok((seen, current));
        }

        self.renew(seen, false).await
    }

    /// Renew after the vendor rejected the current access token.
    ///
    /// If another caller renewed while this one waited for the lock, the
    /// already-renewed set is returned without a second network call.
    pub async fn force_refresh(&self) -> Result<Arc<CredentialSet>, Error> {
        self.force_refresh_from(self.generation()).await
    }

    /// Like [`force_refresh`](Self::force_refresh), but skips the network
    /// call if any renewal completed after generation `seen` was observed.
    pub async fn force_refresh_from(&self, seen: u64) -> Result<Arc<CredentialSet>, Error> {
        Ok(self.renew(seen, true).await?.1)
    }

    /// Install credentials from an explicit re-authorization.
    pub async fn reauthorize(&self, credentials: CredentialSet) {
        let mut state = self.renew_lock.lock().await;
        *state = RenewState::default();
        self.current.store(Arc::new(credentials));
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.reauth_tx.send_replace(false);
        info!("credentials replaced by re-authorization");
    }

    /// Writers hold the lock, so the generation and set read here match.
    async fn renew(&self, seen: u64, forced: bool) -> Result<(u64, Arc<CredentialSet>), Error> {
        let mut state = self.renew_lock.lock().await;

        let generation = self.generation();
        let current = self.current.load_full();
        if generation != seen {
            debug!("credentials renewed by a concurrent caller");
            return Ok((generation, current));
        }

        let now = Utc::now();

        if !forced && !current.expires_within(now, self.policy.safety_margin) {
            return Ok((generation, current));
        }

        if !forced && !current.is_expired(now) {
            if let Some(until) = state.cooldown_until {
                if Instant::now() < until {
                    debug!(
                        remaining_secs = until.saturating_duration_since(Instant::now()).as_secs(),
                        "renewal cooling down, using current token"
                    );
                    return Ok((generation, current));
                }
            }
        }

        if current.refresh_token.expose_secret().is_empty() {
            return Err(self.reject(&mut state, "no refresh token available".into()));
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self
                .renewer
                .renew(&current.refresh_token, &current.client_id)
                .await
            {
                Ok(grant) => return Ok(self.install(&mut state, &current, grant).await),
                Err(e) if is_permanent_rejection(&e) => {
                    return Err(self.reject(&mut state, e.to_string()));
                }
                Err(e) if attempt < self.policy.max_attempts && e.is_transient() => {
                    let delay = self.policy.retry_delay(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "token renewal failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(self.exhausted(&mut state, attempt, &e)),
            }
        }
    }

    async fn install(
        &self,
        state: &mut RenewState,
        previous: &CredentialSet,
        grant: TokenGrant,
    ) -> (u64, Arc<CredentialSet>) {
        let validity = grant.expires_in.unwrap_or(self.policy.default_validity);
        let expires_at =
            Utc::now() + TimeDelta::from_std(validity).unwrap_or(TimeDelta::zero());

        let renewed = Arc::new(CredentialSet {
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .unwrap_or_else(|| previous.refresh_token.clone()),
            client_id: previous.client_id.clone(),
            expires_at,
        });

        self.current.store(Arc::clone(&renewed));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *state = RenewState::default();
        self.reauth_tx.send_if_modified(|flag| std::mem::replace(flag, false));
        info!(expires_at = %expires_at, "access token renewed");

        if let Some(ref sink) = self.sink {
            if let Err(e) = sink.persist(&renewed).await {
                warn!(error = %e, "renewed credentials could not be persisted");
            }
        }

        (generation, renewed)
    }

    fn reject(&self, state: &mut RenewState, message: String) -> Error {
        state.consecutive_failures += 1;
        state.cooldown_until = None;
        error!(reason = %message, "refresh token rejected, re-authorization required");
        self.reauth_tx.send_replace(true);
        Error::RenewalRejected { message }
    }

    fn exhausted(&self, state: &mut RenewState, attempts: u32, cause: &Error) -> Error {
        state.consecutive_failures += 1;
        let cooldown = self.policy.cooldown(state.consecutive_failures);
        state.cooldown_until = Some(Instant::now() + cooldown);

        if state.consecutive_failures >= self.policy.reauth_after_failures {
            error!(
                failures = state.consecutive_failures,
                "token renewal keeps failing, re-authorization required"
            );
            self.reauth_tx.send_replace(true);
        } else {
            warn!(
                error = %cause,
                failures = state.consecutive_failures,
                cooldown_secs = cooldown.as_secs(),
                "token renewal failed"
            );
        }

        Error::RenewalExhausted {
            attempts,
            message: cause.to_string(),
        }
    }

    /// Warn when the wall clock moved much further than monotonic time,
    /// since expiry checks compare against the wall clock.
    fn observe_clock(&self) {
        let wall_now = Utc::now().timestamp_millis();
        let mono_now =
            i64::try_from(self.clock_origin.elapsed().as_millis()).unwrap_or(i64::MAX);

        let wall_prev = self.last_check_wall_ms.swap(wall_now, Ordering::AcqRel);
        let mono_prev = self.last_check_mono_ms.swap(mono_now, Ordering::AcqRel);

        let drift = (wall_now - wall_prev) - (mono_now - mono_prev);
        let threshold =
            i64::try_from(self.policy.clock_jump_threshold.as_millis()).unwrap_or(i64::MAX);
        if drift.abs() > threshold {
            warn!(drift_secs = drift / 1000, "Large time jump detected");
        }
    }
}

/// The refresh token itself was refused; retrying cannot help.
fn is_permanent_rejection(error: &Error) -> bool {
    match error {
        Error::RenewalRejected { .. } | Error::Authentication { .. } => true,
        Error::Api {
            status, message, ..
        } => {
            matches!(status, 400 | 401 | 403) || message.to_lowercase().contains("invalid_grant")
        }
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde::Serialize;

    use super::*;

    struct CountingRenewer {
        calls: AtomicUsize,
        outcome: fn(usize) -> Result<TokenGrant, Error>,
        delay: Duration,
    }

    impl CountingRenewer {
        fn new(outcome: fn(usize) -> Result<TokenGrant, Error>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcome,
                delay: Duration::from_millis(50),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRenewer for CountingRenewer {
        async fn renew(
            &self,
            _refresh_token: &SecretString,
            _client_id: &SecretString,
        ) -> Result<TokenGrant, Error> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            (self.outcome)(n)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        persisted: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CredentialSink for RecordingSink {
        async fn persist(&self, credentials: &CredentialSet) -> Result<(), Error> {
            self.persisted
                .lock()
                .unwrap()
                .push(credentials.access_token.expose_secret().to_owned());
            Ok(())
        }
    }

    fn grant(n: usize) -> Result<TokenGrant, Error> {
        Ok(TokenGrant {
            access_token: SecretString::from(format!("access-{n}")),
            refresh_token: Some(SecretString::from(format!("refresh-{n}"))),
            expires_in: Some(Duration::from_secs(43_200)),
        })
    }

    fn connection_reset(_: usize) -> Result<TokenGrant, Error> {
        Err(Error::Timeout { timeout_secs: 10 })
    }

    fn invalid_grant(_: usize) -> Result<TokenGrant, Error> {
        Err(Error::Api {
            status: 400,
            code: None,
            message: "invalid_grant".into(),
            detail: None,
        })
    }

    fn credentials_expiring_in(secs: i64) -> CredentialSet {
        CredentialSet::new(
            SecretString::from("stale".to_string()),
            SecretString::from("refresh-0".to_string()),
            SecretString::from("api-key".to_string()),
            Some(Utc::now() + TimeDelta::seconds(secs)),
        )
    }

    fn manager(
        credentials: CredentialSet,
        renewer: Arc<CountingRenewer>,
        sink: Option<Arc<dyn CredentialSink>>,
    ) -> Arc<CredentialManager> {
        Arc::new(CredentialManager::new(
            credentials,
            renewer,
            sink,
            RenewalPolicy::default(),
        ))
    }

    #[tokio::test]
    async fn fresh_token_skips_renewal() {
        let renewer = CountingRenewer::new(grant);
        let mgr = manager(credentials_expiring_in(3600), Arc::clone(&renewer), None);

        let creds = mgr.ensure_valid().await.unwrap();
        assert_eq!(creds.access_token.expose_secret(), "stale");
        assert_eq!(renewer.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_renewal() {
        let renewer = CountingRenewer::new(grant);
        let sink = Arc::new(RecordingSink::default());
        let mgr = manager(
            credentials_expiring_in(120),
            Arc::clone(&renewer),
            Some(Arc::clone(&sink) as Arc<dyn CredentialSink>),
        );

        let mut handles = Vec::new();
        for _ in 0..16 {
            let mgr = Arc::clone(&mgr);
            handles.push(tokio::spawn(async move { mgr.ensure_valid().await }));
        }
        for handle in handles {
            let creds = handle.await.unwrap().unwrap();
            assert_eq!(creds.access_token.expose_secret(), "access-0");
        }

        assert_eq!(renewer.calls(), 1);
        assert_eq!(mgr.generation(), 1);
        assert_eq!(*sink.persisted.lock().unwrap(), vec!["access-0".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_force_refresh_renews_once() {
        let renewer = CountingRenewer::new(grant);
        let mgr = manager(credentials_expiring_in(3600), Arc::clone(&renewer), None);

        let (a, b) = tokio::join!(mgr.force_refresh(), mgr.force_refresh());
        assert_eq!(a.unwrap().access_token.expose_secret(), "access-0");
        assert_eq!(b.unwrap().access_token.expose_secret(), "access-0");
        assert_eq!(renewer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_keyed_on_older_generation_reuses_newer_set() {
        let renewer = CountingRenewer::new(grant);
        let mgr = manager(credentials_expiring_in(3600), Arc::clone(&renewer), None);

        let (seen, creds) = mgr.ensure_valid_tracked().await.unwrap();
        assert_eq!(seen, 0);
        assert_eq!(creds.access_token.expose_secret(), "stale");

        // Someone else renews after this caller read its credentials.
        mgr.force_refresh().await.unwrap();
        assert_eq!(renewer.calls(), 1);

        let retried = mgr.force_refresh_from(seen).await.unwrap();
        assert_eq!(retried.access_token.expose_secret(), "access-0");
        assert_eq!(renewer.calls(), 1);

        let (generation, _) = mgr.ensure_valid_tracked().await.unwrap();
        assert_eq!(generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn renewed_set_keeps_rotated_refresh_token() {
        let renewer = CountingRenewer::new(grant);
        let mgr = manager(credentials_expiring_in(60), renewer, None);

        let creds = mgr.ensure_valid().await.unwrap();
        assert_eq!(creds.refresh_token.expose_secret(), "refresh-0");
        assert_eq!(creds.client_id.expose_secret(), "api-key");
        assert!(!creds.expires_within(Utc::now(), Duration::from_secs(900)));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_rejection_signals_reauth_without_retry() {
        let renewer = CountingRenewer::new(invalid_grant);
        let mgr = manager(credentials_expiring_in(60), Arc::clone(&renewer), None);
        let reauth = mgr.reauth_required();

        let result = mgr.ensure_valid().await;
        assert!(
            matches!(result, Err(Error::RenewalRejected { .. })),
            "expected rejection, got: {result:?}"
        );
        assert_eq!(renewer.calls(), 1);
        assert!(*reauth.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_then_cool_down() {
        let renewer = CountingRenewer::new(connection_reset);
        let mgr = manager(credentials_expiring_in(600), Arc::clone(&renewer), None);

        let result = mgr.ensure_valid().await;
        assert!(
            matches!(result, Err(Error::RenewalExhausted { attempts: 3, .. })),
            "expected exhaustion, got: {result:?}"
        );
        assert_eq!(renewer.calls(), 3);
        assert!(!*mgr.reauth_required().borrow());

        // Token is still valid, so the cooldown hands back the cached one.
        let creds = mgr.ensure_valid().await.unwrap();
        assert_eq!(creds.access_token.expose_secret(), "stale");
        assert_eq!(renewer.calls(), 3);

        tokio::time::advance(Duration::from_secs(61)).await;
        let _ = mgr.ensure_valid().await;
        assert_eq!(renewer.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_bypasses_cooldown() {
        let renewer = CountingRenewer::new(connection_reset);
        let mgr = manager(credentials_expiring_in(-10), Arc::clone(&renewer), None);

        assert!(mgr.ensure_valid().await.is_err());
        assert!(mgr.ensure_valid().await.is_err());
        assert_eq!(renewer.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_transient_failures_escalate() {
        let renewer = CountingRenewer::new(connection_reset);
        let mgr = manager(credentials_expiring_in(-10), Arc::clone(&renewer), None);
        let reauth = mgr.reauth_required();

        for _ in 0..4 {
            assert!(mgr.ensure_valid().await.is_err());
            assert!(!*reauth.borrow());
        }
        assert!(mgr.ensure_valid().await.is_err());
        assert!(*reauth.borrow());
    }

    #[tokio::test]
    async fn missing_refresh_token_is_rejected() {
        let renewer = CountingRenewer::new(grant);
        let creds = CredentialSet::new(
            SecretString::from("stale".to_string()),
            SecretString::from(String::new()),
            SecretString::from("api-key".to_string()),
            Some(Utc::now()),
        );
        let mgr = manager(creds, Arc::clone(&renewer), None);

        let result = mgr.ensure_valid().await;
        assert!(matches!(result, Err(Error::RenewalRejected { .. })));
        assert_eq!(renewer.calls(), 0);
    }

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: i64,
    }

    #[test]
    fn expiry_falls_back_to_jwt_claim() {
        let exp = Utc::now().timestamp() + 7200;
        let token = encode(
            &Header::default(),
            &TestClaims {
                sub: "user".into(),
                exp,
            },
            &EncodingKey::from_secret(b"vendor-secret"),
        )
        .unwrap();

        let creds = CredentialSet::new(
            SecretString::from(token),
            SecretString::from("r".to_string()),
            SecretString::from("k".to_string()),
            None,
        );
        assert_eq!(creds.expires_at.timestamp(), exp);
    }

    #[test]
    fn malformed_token_counts_as_expired() {
        let creds = CredentialSet::new(
            SecretString::from("not-a-jwt".to_string()),
            SecretString::from("r".to_string()),
            SecretString::from("k".to_string()),
            None,
        );
        assert!(creds.is_expired(Utc::now()));
    }

    #[test]
    fn retry_and_cooldown_schedules() {
        let policy = RenewalPolicy::default();
        assert_eq!(policy.retry_delay(1), Duration::from_secs(1));
        assert_eq!(policy.retry_delay(2), Duration::from_secs(2));
        assert_eq!(policy.cooldown(1), Duration::from_secs(60));
        assert_eq!(policy.cooldown(2), Duration::from_secs(120));
        assert_eq!(policy.cooldown(3), Duration::from_secs(240));
        assert_eq!(policy.cooldown(4), Duration::from_secs(300));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let rendered = format!("{:?}", credentials_expiring_in(60));
        assert!(!rendered.contains("stale"));
        assert!(!rendered.contains("api-key"));
    }
}
