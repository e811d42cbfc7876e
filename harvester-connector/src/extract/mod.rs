mod html;
pub mod json_path;
mod records;

pub use html::{MainContent, extract_records, main_content, selector_present};
pub use records::records_from_json;
