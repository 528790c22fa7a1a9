use std::path::PathBuf;

use envconfig::Envconfig;
use sdk_common::event_logger::FlushBehavior;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "REPLAY_FIXTURE")]
    pub fixture: PathBuf,

    /// Directory backing the key-value store. State left here by one run is
    /// seen by the next.
    #[envconfig(from = "REPLAY_STORE_DIR", default = ".iap-replay")]
    pub store_dir: PathBuf,

    #[envconfig(from = "REPLAY_FLUSH_BEHAVIOR", default = "auto")]
    pub flush_behavior: FlushBehavior,

    #[envconfig(nested = true)]
    pub iap: iap::config::Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_fixture_is_required() {
        assert!(Config::init_from_hashmap(&HashMap::new()).is_err());
    }

    #[test]
    fn test_defaults() {
        let env = HashMap::from([
            ("REPLAY_FIXTURE".to_owned(), "fixtures/purchase.json".to_owned()),
            ("IAP_DEDUPE_ENABLED".to_owned(), "true".to_owned()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        assert_eq!(config.fixture, PathBuf::from("fixtures/purchase.json"));
        assert_eq!(config.store_dir, PathBuf::from(".iap-replay"));
        assert_eq!(config.flush_behavior, FlushBehavior::Auto);
        assert!(config.iap.dedupe_enabled);
    }

    #[test]
    fn test_flush_behavior() {
        let env = HashMap::from([
            ("REPLAY_FIXTURE".to_owned(), "fixture.json".to_owned()),
            ("REPLAY_FLUSH_BEHAVIOR".to_owned(), "explicit_only".to_owned()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();
        assert_eq!(config.flush_behavior, FlushBehavior::ExplicitOnly);

        let env = HashMap::from([
            ("REPLAY_FIXTURE".to_owned(), "fixture.json".to_owned()),
            ("REPLAY_FLUSH_BEHAVIOR".to_owned(), "sometimes".to_owned()),
        ]);
        assert!(Config::init_from_hashmap(&env).is_err());
    }
}
