//! Canonical command and flag tokens.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Lower,
    Upper,
    Digit,
    Other,
}

fn classify(c: char) -> CharClass {
    match c {
        'a'..='z' => CharClass::Lower,
        'A'..='Z' => CharClass::Upper,
        '0'..='9' => CharClass::Digit,
        // Non-ASCII letters separate words so tokens stay plain ASCII.
        _ => CharClass::Other,
    }
}

/// Convert an identifier into a lowercase, hyphen-separated token.
///
/// `getAccounts` → `get-accounts`, `start_after` → `start-after`,
/// `OAuth2` → `oauth2`, `v2Beta` → `v2-beta`.
pub fn kebab_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut prev = CharClass::Other;

    for c in input.trim().chars() {
        let class = classify(c);
        match class {
            CharClass::Lower | CharClass::Upper | CharClass::Digit => {
                if class == CharClass::Upper
                    && matches!(prev, CharClass::Lower | CharClass::Digit)
                    && !out.is_empty()
                    && !out.ends_with('-')
                {
                    out.push('-');
                }
                out.push(c.to_ascii_lowercase());
            }
            CharClass::Other => {
                if !out.is_empty() && !out.ends_with('-') {
                    out.push('-');
                }
            }
        }
        prev = class;
    }

    while out.ends_with('-') {
        out.pop();
    }
    out
}
