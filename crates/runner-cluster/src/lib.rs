mod grid_engine;

pub use grid_engine::{
    finished_status, map_state, parse_qstat, parse_submitted, submission_script,
    GridEngineRunner, FINISHED_FILE,
};
