pub mod io;

pub use io::{
    load_annotated_documents, output_base_name, output_base_names, save_annotated_documents, save_result_json,
    split_jsonl_to_json_files, SplitReport,
};
