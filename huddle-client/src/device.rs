//! Capability negotiation

use std::sync::Arc;

use huddle_proto::{RtpCapabilities, RtpCodecCapability, TrackKind};
use tracing::{error, info};

use crate::engine::MediaEngine;
use crate::error::{Error, Result};

/// Negotiated capabilities of one session. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilitySet {
    router: RtpCapabilities,
    local: RtpCapabilities,
}

impl CapabilitySet {
    #[must_use]
    pub const fn new(router: RtpCapabilities, local: RtpCapabilities) -> Self {
        Self { router, local }
    }

    /// What the server's router offered
    #[must_use]
    pub const fn router(&self) -> &RtpCapabilities {
        &self.router
    }

    /// What this endpoint can send and receive against that router
    #[must_use]
    pub const fn local(&self) -> &RtpCapabilities {
        &self.local
    }

    #[must_use]
    pub fn find_codec(&self, mime_type: &str) -> Option<&RtpCodecCapability> {
        self.local.find_codec(mime_type)
    }

    #[must_use]
    pub fn can_produce(&self, kind: TrackKind) -> bool {
        self.local.codecs.iter().any(|codec| codec.kind == kind)
    }
}

/// Loads the media engine against the router's capabilities
#[derive(Clone)]
pub struct CapabilityNegotiator {
    engine: Arc<dyn MediaEngine>,
}

impl CapabilityNegotiator {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self { engine }
    }

    /// Gate for every later negotiation step
    ///
    /// An engine rejection (unsupported platform, no common codec) is returned
    /// as [`Error::DeviceLoad`] and is not retried.
    pub async fn load_capabilities(&self, router: &RtpCapabilities) -> Result<Arc<CapabilitySet>> {
        let local = self.engine.load(router).await.map_err(|e| {
            error!(error = %e, "Media engine rejected router capabilities");
            Error::DeviceLoad(e)
        })?;

        info!(
            router_codecs = router.codecs.len(),
            local_codecs = local.codecs.len(),
            "Media device loaded"
        );

        Ok(Arc::new(CapabilitySet::new(router.clone(), local)))
    }
}
