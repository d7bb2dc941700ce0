pub mod comparator;
pub mod conflict;
pub mod engine;
pub mod normalizer;
pub mod status;

pub use comparator::{classify, compare_trees, ActionSummary, Side, SyncAction};
pub use conflict::{
    generate_conflict_name, primary_conflict_resolver, ConflictPolicy, ConflictRecord,
    ConflictResolver, PolicyResolver, Resolution,
};
pub use engine::{SpaceSync, SyncReport};
pub use normalizer::{calculate_hash, remove_directive_body, strip_directive_bodies, ContentNormalizer};
pub use status::{pair_id, JsonStatusStore, SqliteStatusStore, StatusStore, SyncStatusItem, SyncStatusMap};
