//! Verification operations driven by the portal: register, face scan,
//! QR lookup and the admin scan log.

use rollcall_core::{
    generate_lookup_token, CodecError, Embedding, EuclideanMatcher, Identity, Matcher, TokenCodec,
};
use rollcall_store::{NewScanLog, ScanLogEntry, ScanType, Store, StoreError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Attempts at drawing an unused lookup token before giving up.
const TOKEN_ATTEMPTS: usize = 3;

const UNKNOWN_SCANNER: &str = "unknown";

/// Source of fresh lookup tokens for registration.
pub type TokenSource = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("no registered face within threshold")]
    NoMatch,
    #[error("invalid QR code")]
    InvalidCode,
    #[error("user not found")]
    UserNotFound,
    #[error("access denied")]
    Forbidden,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("codec error: {0}")]
    Codec(CodecError),
}

/// New registration as submitted by staff.
#[derive(Debug, Clone)]
pub struct Registration {
    pub identity: Identity,
    pub face_vector: Vec<f32>,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, Serialize)]
pub struct Registered {
    pub id: String,
    /// Encoded lookup token, the literal text for the QR code.
    pub payload: String,
}

/// Outcome of a successful face scan.
#[derive(Debug, Clone, Serialize)]
pub struct FaceMatch {
    pub user: Identity,
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub version: &'static str,
    pub registered: usize,
    pub match_threshold: f32,
}

/// Shared handle to the verification operations. Cheap to clone.
#[derive(Clone)]
pub struct VerificationService {
    store: Store,
    codec: TokenCodec,
    matcher: Arc<dyn Matcher + Send + Sync>,
    token_source: TokenSource,
    match_threshold: f32,
    admin_emails: Arc<Vec<String>>,
    log_limit: usize,
}

impl VerificationService {
    pub fn new(store: Store, codec: TokenCodec, match_threshold: f32) -> Self {
        Self {
            store,
            codec,
            matcher: Arc::new(EuclideanMatcher),
            token_source: Arc::new(generate_lookup_token),
            match_threshold,
            admin_emails: Arc::new(Vec::new()),
            log_limit: 100,
        }
    }

    /// Staff (lower-cased emails) allowed to read the scan log.
    pub fn with_admins(mut self, admin_emails: Vec<String>) -> Self {
        self.admin_emails = Arc::new(admin_emails);
        self
    }

    pub fn with_log_limit(mut self, log_limit: usize) -> Self {
        self.log_limit = log_limit;
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn Matcher + Send + Sync>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_token_source(mut self, token_source: TokenSource) -> Self {
        self.token_source = token_source;
        self
    }

    /// Register a person and return the QR payload for their lookup token.
    pub async fn register(&self, registration: Registration) -> Result<Registered, ServiceError> {
        let Registration {
            identity,
            face_vector,
        } = registration;
        let identity = Identity {
            name: identity.name.trim().to_string(),
            email: identity.email.trim().to_string(),
            roll_no: identity.roll_no.trim().to_string(),
        };
        if identity.name.is_empty()
            || identity.email.is_empty()
            || identity.roll_no.is_empty()
            || face_vector.is_empty()
        {
            return Err(ServiceError::InvalidInput("Fill all fields and capture face"));
        }
        if face_vector.iter().any(|v| !v.is_finite()) {
            return Err(ServiceError::InvalidInput("Face vector must contain finite numbers"));
        }

        let embedding = Embedding::new(face_vector);
        let mut attempt = 0;
        let record = loop {
            attempt += 1;
            let token = (self.token_source)();
            match self
                .store
                .insert_identity(identity.clone(), embedding.clone(), token)
                .await
            {
                Ok(record) => break record,
                Err(StoreError::DuplicateToken) if attempt < TOKEN_ATTEMPTS => {
                    tracing::warn!(attempt, "lookup token collision; drawing a new one");
                }
                Err(e) => return Err(e.into()),
            }
        };

        let payload = self
            .codec
            .encode(&record.lookup_token)
            .map_err(ServiceError::Codec)?;

        tracing::info!(
            id = %record.id,
            roll_no = %record.identity.roll_no,
            dim = record.embedding.dim(),
            "registered identity"
        );

        Ok(Registered {
            id: record.id,
            payload,
        })
    }

    /// Match a live face against every registered face.
    ///
    /// `descriptor` is `None` when the extractor found no face in the frame.
    pub async fn scan_face(
        &self,
        scanner: Option<&str>,
        descriptor: Option<Vec<f32>>,
    ) -> Result<FaceMatch, ServiceError> {
        let Some(values) = descriptor else {
            tracing::debug!("face scan without a detected face");
            return Err(ServiceError::NoFaceDetected);
        };
        if values.is_empty() {
            return Err(ServiceError::InvalidInput("Face descriptor must not be empty"));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ServiceError::InvalidInput("Face descriptor must contain finite numbers"));
        }
        let probe = Embedding::new(values);

        let gallery = self.store.load_gallery().await?;
        let result = self.matcher.compare(&probe, &gallery, self.match_threshold);

        tracing::info!(
            candidates = gallery.len(),
            matched = result.matched,
            distance = ?result.distance,
            "face scan compared"
        );

        match result.candidate(&gallery) {
            Some(candidate) => {
                let user = candidate.identity.clone();
                self.log_scan(scanner, ScanType::Face, Some(&user)).await;
                Ok(FaceMatch {
                    user,
                    distance: result.distance.unwrap_or_default(),
                })
            }
            None => {
                self.log_scan(scanner, ScanType::Face, None).await;
                Err(ServiceError::NoMatch)
            }
        }
    }

    /// Decode a scanned QR payload and look up its owner.
    pub async fn lookup_qr(&self, scanner: Option<&str>, payload: &str) -> Result<Identity, ServiceError> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(ServiceError::InvalidInput("No encoded text provided"));
        }

        let token = self.codec.decode(payload).map_err(|_| ServiceError::InvalidCode)?;

        match self.store.find_by_token(&token).await? {
            Some(user) => {
                tracing::info!(roll_no = %user.roll_no, "QR lookup resolved");
                self.log_scan(scanner, ScanType::Qr, Some(&user)).await;
                Ok(user)
            }
            None => {
                tracing::info!("QR lookup for unknown token");
                self.log_scan(scanner, ScanType::Qr, None).await;
                Err(ServiceError::UserNotFound)
            }
        }
    }

    /// Newest scan log entries, for admins only.
    pub async fn recent_logs(&self, requester: Option<&str>) -> Result<Vec<ScanLogEntry>, ServiceError> {
        if !self.is_admin(requester) {
            tracing::warn!(requester = requester.unwrap_or(UNKNOWN_SCANNER), "scan log access denied");
            return Err(ServiceError::Forbidden);
        }
        Ok(self.store.recent_scans(self.log_limit).await?)
    }

    pub async fn status(&self) -> Result<ServiceStatus, ServiceError> {
        Ok(ServiceStatus {
            version: env!("CARGO_PKG_VERSION"),
            registered: self.store.count_identities().await?,
            match_threshold: self.match_threshold,
        })
    }

    fn is_admin(&self, requester: Option<&str>) -> bool {
        let Some(email) = requester.map(|e| e.trim().to_lowercase()) else {
            return false;
        };
        self.admin_emails.iter().any(|a| *a == email)
    }

    /// Append to the scan log. Failures are logged, never returned.
    async fn log_scan(&self, scanner: Option<&str>, scan_type: ScanType, matched: Option<&Identity>) {
        let entry = NewScanLog {
            scanner_email: scanner
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(UNKNOWN_SCANNER)
                .to_string(),
            scan_type,
            matched_name: matched.map(|u| u.name.clone()),
            matched_email: matched.map(|u| u.email.clone()),
        };
        if let Err(e) = self.store.record_scan(entry).await {
            tracing::warn!(error = %e, %scan_type, "failed to record scan log");
        }
    }
}
