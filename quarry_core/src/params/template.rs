//! `{{ name }}` placeholder scanning and substitution.

/// Names referenced by placeholders, in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    scan(template, |name| {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        None
    });
    names
}

/// Replaces every placeholder `lookup` knows about. Unknown placeholders are
/// kept verbatim.
pub fn render(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    scan(template, |name| lookup(name))
}

fn scan(template: &str, mut on_placeholder: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            break;
        };
        out.push_str(&rest[..open]);

        let raw = &rest[open..open + 2 + close + 2];
        let name = after_open[..close].trim();
        match on_placeholder(name) {
            Some(value) if !name.is_empty() => out.push_str(&value),
            _ => out.push_str(raw),
        }
        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    out
}
