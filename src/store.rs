//! Session persistence as a single JSON document.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::chain::SessionStore;
use crate::errors::Result;
use crate::trading::TradeSession;

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for JsonFileStore {
    /// Write beside the target and rename over it, so a crash mid-write
    /// leaves the previous state intact.
    fn persist_session(&self, session: &TradeSession) -> Result<()> {
        let json = serde_json::to_vec_pretty(session)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "[STORE] session saved");
        Ok(())
    }

    fn load_session(&self) -> Result<Option<TradeSession>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let session: TradeSession = serde_json::from_slice(&raw)?;
        session.validate()?;
        Ok(Some(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Fraction, Percent};
    use crate::trading::session::tests::session;
    use crate::trading::{Target, TargetAmount};
    use num_bigint::BigInt;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("session.json"));
        assert!(store.load_session().unwrap().is_none());
    }

    #[test]
    fn sessions_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("session.json"));
        let mut s = session(
            vec![Target::buy(
                Fraction::from_decimal_str("0.0015").unwrap(),
                TargetAmount::Exact(BigInt::from(5_000_000)),
            )],
            vec![Target::sell(
                Fraction::from_integer(0),
                TargetAmount::PercentOfBought(Percent::from_bps(2_500)),
            )
            .with_price_percent(Percent::from_bps(1_000))],
        );
        s.total_bought = BigInt::from(123_456_789u64);
        s.init_price = Some(Fraction::new(7, 3));

        store.persist_session(&s).unwrap();
        assert!(!store.path().with_extension("json.tmp").exists());
        let loaded = store.load_session().unwrap().unwrap();
        assert_eq!(loaded, s);

        // overwrites replace the previous document
        s.buy_hit_count = 4;
        store.persist_session(&s).unwrap();
        assert_eq!(store.load_session().unwrap().unwrap().buy_hit_count, 4);
    }

    #[test]
    fn corrupt_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(JsonFileStore::new(path).load_session().is_err());
    }
}
