use std::sync::Arc;

use tracing::info;

use crate::DeepResearchError;
use crate::client::{DynJobClient, StubJobClient};
use crate::config::Config;
use crate::interactions::InteractionsClient;

/// Which research provider backs the job client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderChoice {
    /// Hosted Interactions API; requires the configured API key.
    #[default]
    Interactions,
    /// Offline stub that completes every job on the first poll.
    Stub,
}

impl ProviderChoice {
    pub fn offline(offline: bool) -> Self {
        if offline { Self::Stub } else { Self::Interactions }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProviderChoice::Interactions => "interactions",
            ProviderChoice::Stub => "stub",
        }
    }

    pub fn build(self, config: &Config) -> Result<DynJobClient, DeepResearchError> {
        info!(provider = self.label(), agent = %config.provider.agent, "building research job client");
        match self {
            ProviderChoice::Interactions => {
                let api_key = config.provider_api_key()?;
                Ok(Arc::new(InteractionsClient::new(&config.provider, api_key)?))
            }
            ProviderChoice::Stub => Ok(Arc::new(StubJobClient::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_needs_no_credentials() {
        let mut config = Config::default();
        config.provider.api_key_env = "DEEPRESEARCH_TEST_KEY_THAT_IS_NEVER_SET".into();
        assert!(ProviderChoice::Stub.build(&config).is_ok());
    }

    #[test]
    fn hosted_provider_requires_api_key() {
        let mut config = Config::default();
        config.provider.api_key_env = "DEEPRESEARCH_TEST_KEY_THAT_IS_NEVER_SET".into();
        let err = ProviderChoice::Interactions.build(&config).err().unwrap();
        assert!(matches!(err, DeepResearchError::MissingSecret(_)));
    }
}
