pub mod formatter;

pub use formatter::{
    format_contributions, format_field_errors, format_formula, format_model_detail, format_model_list,
    format_number, format_result, format_staged_outcome, format_tsv, should_use_colors,
};
