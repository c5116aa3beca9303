//! Recognised renderer failure messages and their stable codes.

use super::RenderOutcome;

pub const SUCCESS_SENTINEL: &str = "ImageGenerator did not have any errors on generation";
pub const UNKNOWN_ERROR_CODE: u32 = 1005;
const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error occurred during chart generation";

/// Lines that must match exactly.
const EXACT_ERRORS: &[(&str, u32)] = &[
    ("Settings is not valid to generate chart.", 1000),
    ("Error! No columns selected", 1001),
    ("Internal error while generating!", 1002),
    ("Out of Memory!", 1003),
    ("There was an error generating the image. Quitting.", 1004),
];

/// Fragments that may appear anywhere in a line.
const PARTIAL_ERRORS: &[(&str, u32)] = &[
    ("Premature end of file.", 2000),
    ("Content is not allowed in prolog.", 2001),
    ("[Fatal Error]", 2002),
    ("java.util.zip.ZipException: error in opening zip file", 2003),
];

/// Code of the first recognised error in `line`, exact matches first.
pub fn known_error_code(line: &str) -> Option<u32> {
    EXACT_ERRORS
        .iter()
        .find(|(message, _)| line == *message)
        .or_else(|| {
            PARTIAL_ERRORS
                .iter()
                .find(|(fragment, _)| line.contains(fragment))
        })
        .map(|(_, code)| *code)
}

/// Decide how a finished run went from its complete output.
///
/// The sentinel is expected on the second-to-last stdout line because the
/// renderer ends its output with a newline.
pub fn classify(stdout: &str, stderr: &str) -> RenderOutcome {
    let stdout_lines: Vec<&str> = stdout.split('\n').collect();
    let sentinel_line = stdout_lines
        .len()
        .checked_sub(2)
        .and_then(|index| stdout_lines.get(index))
        .map(|line| line.trim_end_matches('\r'));
    if sentinel_line == Some(SUCCESS_SENTINEL) {
        return RenderOutcome::success();
    }

    stdout_lines
        .iter()
        .copied()
        .chain(stderr.split('\n'))
        .map(|line| line.trim_end_matches('\r'))
        .find_map(|line| known_error_code(line).map(|code| RenderOutcome::failure(code, line)))
        .unwrap_or_else(|| RenderOutcome::failure(UNKNOWN_ERROR_CODE, UNKNOWN_ERROR_MESSAGE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_errors_need_the_whole_line() {
        assert_eq!(known_error_code("Out of Memory!"), Some(1003));
        assert_eq!(known_error_code("Warning: Out of Memory!"), None);
    }

    #[test]
    fn partial_errors_match_inside_a_line() {
        assert_eq!(
            known_error_code("[Fatal Error] :1:1: Content is not allowed in prolog."),
            Some(2001)
        );
        assert_eq!(known_error_code("[Fatal Error] :3:7: oops"), Some(2002));
    }

    #[test]
    fn sentinel_on_second_to_last_line_is_success() {
        let stdout = format!("Generating Image\n{SUCCESS_SENTINEL}\n");
        assert!(classify(&stdout, "").is_success());
    }

    #[test]
    fn sentinel_elsewhere_is_not_success() {
        let stdout = format!("{SUCCESS_SENTINEL}\nsomething after\n");
        assert_eq!(
            classify(&stdout, ""),
            RenderOutcome::failure(UNKNOWN_ERROR_CODE, UNKNOWN_ERROR_MESSAGE)
        );
    }

    #[test]
    fn stdout_is_scanned_before_stderr() {
        let outcome = classify(
            "Loading\nError! No columns selected\n",
            "Premature end of file.\n",
        );
        assert_eq!(
            outcome,
            RenderOutcome::failure(1001, "Error! No columns selected")
        );

        let outcome = classify("Loading\n", "java.util.zip.ZipException: error in opening zip file\n");
        assert_eq!(outcome.known_error_code, 2003);
    }

    #[test]
    fn unrecognised_failure_falls_back_to_unknown() {
        let outcome = classify("", "Exception in thread main\n");
        assert_eq!(outcome.known_error_code, UNKNOWN_ERROR_CODE);
        assert_eq!(outcome.error_message, UNKNOWN_ERROR_MESSAGE);
    }
}
