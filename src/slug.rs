use async_trait::async_trait;

/// Collision bound for `generate_slug`. Each step costs a store lookup, so
/// an unbounded loop against a hostile data set would never return; no real
/// catalog comes anywhere near this many same-named records.
const MAX_SUFFIX: u32 = 10_000;

/// Uniqueness scope a slug is generated against: per-book for chapters,
/// global for books and users.
#[async_trait]
pub trait SlugScope: Sync {
    async fn is_taken(&self, slug: &str) -> anyhow::Result<bool>;
}

/// Normalize a human-readable name into a URL-safe slug.
///
/// Lowercase, trim, whitespace runs become `-`, `&` becomes `-and-`,
/// remaining non-word characters become `-`, repeated `-` collapse, and
/// leading/trailing `-` are stripped.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch == '&' {
            out.push_str("-and-");
        } else if ch.is_whitespace() {
            out.push('-');
        } else if ch.is_alphanumeric() || ch == '_' {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            out.push('-');
        }
    }

    let mut collapsed = String::with_capacity(out.len());
    let mut prev_dash = false;
    for ch in out.chars() {
        if ch == '-' {
            if !prev_dash {
                collapsed.push('-');
            }
            prev_dash = true;
        } else {
            collapsed.push(ch);
            prev_dash = false;
        }
    }

    collapsed.trim_matches('-').to_owned()
}

/// Generate a slug for `name` that is unoccupied within `scope`.
///
/// The base slug is tried first; on collision a numeric suffix is appended
/// and incremented (`name-1`, `name-2`, ...) until an unused slug is found.
pub async fn generate_slug(scope: &(dyn SlugScope + '_), name: &str) -> anyhow::Result<String> {
    let base = slugify(name);
    if base.is_empty() {
        anyhow::bail!("name produces an empty slug: {name:?}");
    }

    if !scope.is_taken(&base).await? {
        return Ok(base);
    }

    for count in 1..=MAX_SUFFIX {
        let candidate = format!("{base}-{count}");
        if !scope.is_taken(&candidate).await? {
            return Ok(candidate);
        }
    }

    anyhow::bail!("no free slug for {base:?} within {MAX_SUFFIX} attempts")
}
