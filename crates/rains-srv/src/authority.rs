//! Local authority: zones compiled from zonefiles, signed by this node and
//! asserted into the engine at startup.

use chrono::{DateTime, TimeDelta, Utc};
use rains_core::{zonefile, Algorithm, Signature};
use std::path::Path;
use tracing::info;

use crate::engine::QueryEngine;
use crate::error::SrvError;

/// Compile `path` and assert every zone in it. Zones the file leaves
/// unsigned are signed over `[now, now + validity)`. Returns the number of
/// zones loaded.
pub fn load_zonefile(
    engine: &QueryEngine,
    path: &Path,
    validity: TimeDelta,
    now: DateTime<Utc>,
) -> crate::Result<usize> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SrvError::Config(format!("read {}: {e}", path.display())))?;
    let zones = zonefile::parse(&text)
        .map_err(|e| SrvError::Config(format!("{}: {e}", path.display())))?;

    let until = now
        .checked_add_signed(validity)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let count = zones.len();
    for mut zone in zones {
        if zone.signatures.is_empty() {
            zone.signatures = vec![Signature::new(Algorithm::Ecdsa256, now, until)];
        }
        let (name, context, assertions) =
            (zone.zone.clone(), zone.context.clone(), zone.assertions.len());
        engine.assert_set(zone, now)?;
        info!(zone = %name, context = %context, assertions, "loaded zone");
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LookupOutcome;
    use crate::switchboard::Outbound;
    use rains_core::{Message, Object, ObjectKind, ObjectKindSet};
    use std::io::Write;
    use std::sync::Arc;

    struct Nowhere;

    impl Outbound for Nowhere {
        fn send(&self, peer: &str, _message: Message) -> crate::Result<()> {
            Err(SrvError::Switchboard(format!("no route to {peer}")))
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    const ZONEFILE: &str = "
# example zone
:Z: example. . [
    :A: www [ :name: www.example. ]
    :A: mail [ :redir: ns.example. ]
]
";

    #[test]
    fn test_load_zonefile_serves_its_assertions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ZONEFILE.as_bytes()).unwrap();
        let engine = QueryEngine::new(Arc::new(Nowhere), TimeDelta::seconds(5));

        let loaded = load_zonefile(&engine, file.path(), TimeDelta::hours(1), now()).unwrap();
        assert_eq!(loaded, 1);

        let names = ObjectKindSet::empty().with(ObjectKind::Name);
        match engine.lookup(".", "example.", "www", names, now()).unwrap() {
            LookupOutcome::Hit(found) => {
                assert_eq!(found[0].objects, vec![Object::Name("www.example.".into())]);
            }
            other => panic!("expected a hit, got {other:?}"),
        }
        // The zone is complete, so an absent name is a proven negative.
        assert!(matches!(
            engine.lookup(".", "example.", "ftp", names, now()).unwrap(),
            LookupOutcome::AuthoritativeNegative
        ));
        // Signatures expire with the configured validity.
        assert!(matches!(
            engine
                .lookup(".", "example.", "www", names, now() + TimeDelta::hours(2))
                .unwrap(),
            LookupOutcome::Unknown
        ));
    }

    #[test]
    fn test_signed_zonefile_keeps_its_signatures() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b":Z: example. . [
                :sig: ecdsa-256 2023-11-01T00:00:00 2024-01-01T00:00:00
                :A: www [ :name: www.example. ]
            ]",
        )
        .unwrap();
        let engine = QueryEngine::new(Arc::new(Nowhere), TimeDelta::seconds(5));
        load_zonefile(&engine, file.path(), TimeDelta::hours(1), now()).unwrap();

        let names = ObjectKindSet::empty().with(ObjectKind::Name);
        let later = now() + TimeDelta::days(7);
        match engine.lookup(".", "example.", "www", names, later).unwrap() {
            LookupOutcome::Hit(found) => {
                assert_eq!(found[0].signatures[0].valid_until.timestamp(), 1_704_067_200);
            }
            other => panic!("expected a hit, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_and_invalid_zonefiles_are_config_errors() {
        let engine = QueryEngine::new(Arc::new(Nowhere), TimeDelta::seconds(5));
        let err = load_zonefile(
            &engine,
            Path::new("/nonexistent/zone.txt"),
            TimeDelta::hours(1),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, SrvError::Config(_)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b":Z: example. . [ :A: www [ :bogus: x ] ]").unwrap();
        let err = load_zonefile(&engine, file.path(), TimeDelta::hours(1), now()).unwrap_err();
        assert!(matches!(err, SrvError::Config(_)));
    }
}
