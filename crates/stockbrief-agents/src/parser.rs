use stockbrief_models::section::Grade;

const GRADE_LABEL: &str = "ta grade";

/// Find the letter grade a model stated in its technical analysis.
///
/// Handles common response formats:
/// - Plain: `TA Grade: B`
/// - Markdown bold: `**TA Grade: B**` or `**TA Grade:** B`
/// - Bracketed: `TA Grade: [C]`
///
/// Only the first labelled grade is read. A word after the label (e.g. `TA Grade: Buy`)
/// is not a grade.
pub fn extract_grade(text: &str) -> Option<Grade> {
    let lower = text.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(found) = lower[search_from..].find(GRADE_LABEL) {
        let after = search_from + found + GRADE_LABEL.len();
        let mut rest = text[after..]
            .chars()
            .skip_while(|c| matches!(c, ':' | '*' | ' ' | '\t' | '[' | '='));

        if let Some(letter) = rest.next() {
            let terminated = rest.next().map_or(true, |c| !c.is_ascii_alphanumeric());
            if terminated {
                if let Some(grade) = Grade::from_letter(letter) {
                    return Some(grade);
                }
            }
        }
        search_from = after;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_label() {
        assert_eq!(extract_grade("TA Grade: B\nRationale..."), Some(Grade::B));
    }

    #[test]
    fn markdown_bold() {
        assert_eq!(extract_grade("**TA Grade: A**"), Some(Grade::A));
        assert_eq!(extract_grade("**TA Grade:** D"), Some(Grade::D));
    }

    #[test]
    fn bracketed_and_lowercase() {
        assert_eq!(extract_grade("ta grade: [c]"), Some(Grade::C));
    }

    #[test]
    fn modifier_suffix_allowed() {
        assert_eq!(extract_grade("TA Grade: B+ overall"), Some(Grade::B));
    }

    #[test]
    fn word_is_not_a_grade() {
        assert_eq!(extract_grade("TA Grade: Buy the dip"), None);
    }

    #[test]
    fn later_label_used_when_first_is_placeholder() {
        let text = "TA Grade: [Letter]\n\nTA Grade: F";
        assert_eq!(extract_grade(text), Some(Grade::F));
    }

    #[test]
    fn no_label() {
        assert_eq!(extract_grade("The trend is up."), None);
    }
}
