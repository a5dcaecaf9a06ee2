// Peer Grouping System - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod affinity;
pub mod db;
pub mod export;
pub mod grouping;
pub mod roster;

// Re-export commonly used types
pub use affinity::{AffinityMatrix, NEUTRAL_SCORE};
pub use db::{
    count_students, get_all_ratings, get_all_students, get_events_for_entity,
    get_ratings_by_rater, insert_event, insert_students, is_form_open,
    replace_ratings_for_rater, set_form_open, setup_database, Event, Rating, Student,
    MAX_SCORE, MIN_SCORE,
};
pub use export::{grouping_csv, grouping_grid_csv, relationship_matrix_csv};
pub use grouping::{
    determine_target_size, GroupingEngine, Partition, DEFAULT_PASS_LIMIT, MAX_GROUP_SIZE,
    MIN_GROUP_SIZE,
};
pub use roster::{load_roster, load_roster_csv, load_roster_xml, parse_roster_xml};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
