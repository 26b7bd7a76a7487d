// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Normalization of binary package `control` files.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html#s-binarycontrolfiles>
for the canonical definition of binary package control files.

Package builders in the wild sometimes emit optional fields without a value
(e.g. `Homepage:`). Those fields are noise in a `Packages` index, so they are
removed. Classification of lines is purely syntactic: a line that starts like
`Field:` is a *simple* field and everything else is a continuation of a
*folded* or *multiline* field. Continuation lines are passed through verbatim,
no matter what they contain.
*/

use {once_cell::sync::Lazy, regex::Regex};

/// Matches the start of a `Field: value` line.
pub static RE_SIMPLE_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w[\w.-]*:").unwrap());

/// Whether a line in a control file starts a simple `Field: value` definition.
pub fn is_simple_field_line(line: &str) -> bool {
    RE_SIMPLE_FIELD.is_match(line)
}

/// The normalized lines of a binary package control paragraph.
///
/// Every line is either a `Field: value` line with a non-empty value or a
/// continuation line of the preceding field.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ControlStanza {
    lines: Vec<String>,
}

impl ControlStanza {
    /// Normalize raw `control` file text into a stanza.
    ///
    /// Leading and trailing whitespace of the whole text is removed. Simple fields
    /// whose value is empty after trimming are dropped. All other lines are kept in
    /// their original order.
    pub fn normalize(text: &str) -> Self {
        let text = text.trim();

        if text.is_empty() {
            return Self::default();
        }

        let lines = text
            .split('\n')
            .filter(|line| {
                if is_simple_field_line(line) {
                    match line.split_once(':') {
                        Some((_, value)) => !value.trim().is_empty(),
                        None => true,
                    }
                } else {
                    true
                }
            })
            .map(|line| line.to_string())
            .collect::<Vec<_>>();

        Self { lines }
    }

    /// Obtain an iterator over lines in this stanza.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> + '_ {
        self.lines.iter().map(|x| x.as_str())
    }

    /// Whether the stanza has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Obtain the value of a simple field, if present.
    ///
    /// Field name matching is case insensitive, as it is for control files in general.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.lines
            .iter()
            .filter(|line| is_simple_field_line(line))
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
    }
}

impl std::fmt::Display for ControlStanza {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.lines.join("\n"))
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    #[test]
    fn blank_fields_removed() {
        let stanza = ControlStanza::normalize("Package: foo\nVersion: 1.0\nHomepage:\n");

        assert_eq!(stanza.to_string(), "Package: foo\nVersion: 1.0");
    }

    #[test]
    fn whitespace_only_value_removed() {
        let stanza = ControlStanza::normalize("Package: foo\nHomepage:   \t\nSection: misc");

        assert_eq!(stanza.to_string(), "Package: foo\nSection: misc");
    }

    #[test]
    fn continuation_lines_preserved() {
        let text = indoc! {"
            Package: foo
            Version: 1.0
            Homepage:
            Description: short summary
             Long description line one.
             .
             Empty: value looking continuation
            Depends:
            Conffiles:
             /etc/foo.conf 0123456789abcdef
        "};

        let stanza = ControlStanza::normalize(text);

        assert_eq!(
            stanza.iter_lines().collect::<Vec<_>>(),
            vec![
                "Package: foo",
                "Version: 1.0",
                "Description: short summary",
                " Long description line one.",
                " .",
                " Empty: value looking continuation",
                " /etc/foo.conf 0123456789abcdef",
            ]
        );
    }

    #[test]
    fn field_shapes() {
        assert!(is_simple_field_line("Package: foo"));
        assert!(is_simple_field_line("X-Python3.9-Version: 3.9"));
        assert!(is_simple_field_line("Original-Maintainer:"));
        assert!(is_simple_field_line("A:"));
        assert!(!is_simple_field_line(" Package: foo"));
        assert!(!is_simple_field_line("\tPackage: foo"));
        assert!(!is_simple_field_line("-Field: foo"));
        assert!(!is_simple_field_line("Two words: foo"));
        assert!(!is_simple_field_line("."));
    }

    #[test]
    fn surrounding_whitespace_trimmed() {
        let stanza = ControlStanza::normalize("\n\n  Package: foo\nArchitecture: amd64\n\n\n");

        assert_eq!(stanza.to_string(), "Package: foo\nArchitecture: amd64");
        assert_eq!(stanza.field_str("package"), Some("foo"));
        assert_eq!(stanza.field_str("Architecture"), Some("amd64"));
        assert_eq!(stanza.field_str("Version"), None);
    }

    #[test]
    fn empty_text() {
        assert!(ControlStanza::normalize("  \n ").is_empty());
        assert_eq!(ControlStanza::normalize("").to_string(), "");
    }
}
