pub mod answer;
pub mod loaders;
pub mod record;

pub use answer::{AnswerMap, ContiguityReport, QuestionKey, Sentinel};
pub use loaders::{load_all_scan_folders, load_answer_key, load_scan_folder, ScanFolder};
pub use record::{
    AnswerKeyRecord, Breakdown, BreakdownEntry, CheckingResult, StudentResult, StudentSheet,
};
