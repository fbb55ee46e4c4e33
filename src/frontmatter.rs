use anyhow::Context as _;
use serde::Deserialize;

/// Attribute block of a chapter source file. Keys follow the wire contract
/// with the content repository, hence the camelCase names.
#[derive(Debug, Clone, Deserialize)]
pub struct ChapterAttributes {
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default, rename = "isFree")]
    pub is_free: bool,
    #[serde(default, rename = "seoTitle")]
    pub seo_title: String,
    #[serde(default, rename = "seoDescription")]
    pub seo_description: String,
}

#[derive(Debug, Clone)]
pub struct FrontMatterDocument {
    pub attributes: ChapterAttributes,
    /// Markdown body below the closing `---` marker.
    pub body: String,
}

/// Split a chapter file into its `---`-delimited YAML attribute block and
/// markdown body. The attribute block is mandatory and must carry `title`.
pub fn parse(contents: &str) -> anyhow::Result<FrontMatterDocument> {
    let mut lines = contents.lines();
    let first = lines
        .next()
        .ok_or_else(|| anyhow::anyhow!("chapter source is empty"))?;
    if first.trim_end() != "---" {
        anyhow::bail!("chapter source must start with YAML front matter ('---')");
    }

    let mut yaml_lines = Vec::new();
    let mut closed = false;
    for line in lines.by_ref() {
        if line.trim_end() == "---" {
            closed = true;
            break;
        }
        yaml_lines.push(line);
    }
    if !closed {
        anyhow::bail!("front matter is not closed with '---'");
    }

    let yaml = yaml_lines.join("\n");
    let attributes: ChapterAttributes =
        serde_yaml::from_str(&yaml).context("deserialize chapter front matter")?;

    let body = lines.collect::<Vec<_>>().join("\n");

    Ok(FrontMatterDocument { attributes, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attributes_and_body() -> anyhow::Result<()> {
        let doc = parse(
            "---\n\
             title: Getting Started\n\
             excerpt: A taste of things to come\n\
             isFree: true\n\
             seoTitle: Getting Started Guide\n\
             ---\n\
             \n\
             ## First section\n\
             body text\n",
        )?;

        assert_eq!(doc.attributes.title, "Getting Started");
        assert_eq!(doc.attributes.excerpt, "A taste of things to come");
        assert!(doc.attributes.is_free);
        assert_eq!(doc.attributes.seo_title, "Getting Started Guide");
        assert_eq!(doc.attributes.seo_description, "");
        assert!(doc.body.contains("## First section"));
        Ok(())
    }

    #[test]
    fn optional_attributes_default() -> anyhow::Result<()> {
        let doc = parse("---\ntitle: Bare\n---\nbody\n")?;
        assert_eq!(doc.attributes.title, "Bare");
        assert!(!doc.attributes.is_free);
        assert_eq!(doc.attributes.excerpt, "");
        Ok(())
    }

    #[test]
    fn missing_title_fails() {
        assert!(parse("---\nexcerpt: no title here\n---\nbody\n").is_err());
    }

    #[test]
    fn missing_front_matter_fails() {
        assert!(parse("# Just markdown\n").is_err());
    }

    #[test]
    fn unclosed_front_matter_fails() {
        assert!(parse("---\ntitle: Oops\n").is_err());
    }
}
