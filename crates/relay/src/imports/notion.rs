//! Parsing of extracted Notion exports. The export tool names every file
//! and directory `<human title> <16-to-32-hex id>`; directories nest child
//! pages under the page whose stem they share. Markdown bodies reference
//! sibling files by URL-encoded relative path; those references are
//! remapped onto the new pages by id.

use models::Filetype;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub title: String,
    /// Hex id the export assigned, when the name carried one.
    pub source_id: Option<String>,
    /// Path within the archive, for provenance records.
    pub source_path: String,
    pub filetype: Filetype,
    pub content: String,
    pub children: Vec<ParsedPage>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ParseStats {
    /// Files of unsupported types; counted, never failed.
    pub skipped: usize,
}

/// Split `<title> <hex id>` on the export's trailing id convention.
pub fn split_title_and_id(stem: &str) -> (String, Option<String>) {
    if let Some((title, suffix)) = stem.rsplit_once(' ') {
        let is_hex_id = (16..=32).contains(&suffix.len())
            && suffix.chars().all(|c| c.is_ascii_hexdigit());
        if is_hex_id && !title.is_empty() {
            return (title.to_string(), Some(suffix.to_lowercase()));
        }
    }
    (stem.to_string(), None)
}

fn filetype_for(path: &Path) -> Option<Filetype> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("md") => Some(Filetype::Md),
        Some("csv") => Some(Filetype::Csv),
        _ => None,
    }
}

/// Build the page tree from an extracted export directory.
pub fn build_page_tree(root: &Path) -> anyhow::Result<(Vec<ParsedPage>, ParseStats)> {
    let mut stats = ParseStats::default();
    let pages = walk_dir(root, root, &mut stats)?;
    Ok((pages, stats))
}

fn walk_dir(
    root: &Path,
    dir: &Path,
    stats: &mut ParseStats,
) -> anyhow::Result<Vec<ParsedPage>> {
    let mut entries: Vec<std::fs::DirEntry> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    // First the files, keyed by stem so nested directories can attach.
    let mut pages: Vec<ParsedPage> = Vec::new();
    let mut by_stem: HashMap<String, usize> = HashMap::new();

    for entry in &entries {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(filetype) = filetype_for(&path) else {
            stats.skipped += 1;
            continue;
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let (title, source_id) = split_title_and_id(&stem);
        let content = std::fs::read_to_string(&path)?;
        let source_path = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();

        by_stem.insert(stem, pages.len());
        pages.push(ParsedPage {
            title,
            source_id,
            source_path,
            filetype,
            content,
            children: Vec::new(),
        });
    }

    // Then directories: children of the page sharing their stem, or a
    // bodyless container page when no file matches.
    for entry in &entries {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let stem = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let children = walk_dir(root, &path, stats)?;
        if children.is_empty() {
            continue;
        }

        if let Some(&index) = by_stem.get(&stem) {
            pages[index].children.extend(children);
        } else {
            let (title, source_id) = split_title_and_id(&stem);
            let source_path = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            pages.push(ParsedPage {
                title,
                source_id,
                source_path,
                filetype: Filetype::Md,
                content: String::new(),
                children,
            });
        }
    }

    Ok(pages)
}

pub fn flatten(pages: &[ParsedPage]) -> Vec<&ParsedPage> {
    let mut flat = Vec::new();
    for page in pages {
        flat.push(page);
        flat.extend(flatten(&page.children));
    }
    flat
}

/// Rewrite markdown references that point at other files in the same
/// archive to `/pages/{new external id}` using the precomputed
/// (source id -> new external id) map. Unknown targets are left untouched.
pub fn remap_links(content: &str, id_map: &HashMap<String, models::Id>) -> String {
    lazy_static::lazy_static! {
        static ref MD_LINK: regex::Regex =
            regex::Regex::new(r"\[([^\]]*)\]\(([^)]+)\)").unwrap();
    }

    MD_LINK
        .replace_all(content, |caps: &regex::Captures<'_>| {
            let text = &caps[1];
            let target = &caps[2];

            if target.starts_with("http://")
                || target.starts_with("https://")
                || target.starts_with('/')
            {
                return caps[0].to_string();
            }

            let decoded = percent_encoding::percent_decode_str(target)
                .decode_utf8()
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| target.to_string());

            let path = Path::new(&decoded);
            let remapped = filetype_for(path).and_then(|_| {
                let stem = path.file_stem()?.to_str()?;
                let (_, source_id) = split_title_and_id(stem);
                id_map.get(&source_id?).copied()
            });

            match remapped {
                Some(new_id) => format!("[{text}](/pages/{new_id})"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_title_and_id() {
        let (title, id) = split_title_and_id("Meeting Notes 0123456789abcdef");
        assert_eq!(title, "Meeting Notes");
        assert_eq!(id.as_deref(), Some("0123456789abcdef"));

        // 32-hex ids parse too.
        let (title, id) = split_title_and_id("Roadmap 0123456789abcdef0123456789ABCDEF");
        assert_eq!(title, "Roadmap");
        assert_eq!(id.as_deref(), Some("0123456789abcdef0123456789abcdef"));

        // Too short, not hex, or missing: the whole stem is the title.
        assert_eq!(split_title_and_id("Notes abc123"), ("Notes abc123".to_string(), None));
        assert_eq!(
            split_title_and_id("Plain title"),
            ("Plain title".to_string(), None)
        );
        assert_eq!(split_title_and_id("README"), ("README".to_string(), None));
    }

    #[test]
    fn test_build_tree_nests_directories_under_their_page() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        std::fs::write(
            root.join("Home 0123456789abcdef.md"),
            "# Home\n[child](Home%200123456789abcdef/Child%20fedcba9876543210.md)",
        )
        .unwrap();
        std::fs::create_dir(root.join("Home 0123456789abcdef")).unwrap();
        std::fs::write(
            root.join("Home 0123456789abcdef/Child fedcba9876543210.md"),
            "child body",
        )
        .unwrap();
        std::fs::write(root.join("data 0123456789abcdef01.csv"), "a,b\n1,2").unwrap();
        std::fs::write(root.join("image.png"), [0u8; 4]).unwrap();

        let (pages, stats) = build_page_tree(root).unwrap();
        assert_eq!(stats.skipped, 1, "the png is skipped, not failed");
        assert_eq!(pages.len(), 2);

        let home = pages.iter().find(|p| p.title == "Home").unwrap();
        assert_eq!(home.children.len(), 1);
        assert_eq!(home.children[0].title, "Child");

        let csv = pages.iter().find(|p| p.title == "data").unwrap();
        assert_eq!(csv.filetype, Filetype::Csv);

        assert_eq!(flatten(&pages).len(), 3);
    }

    #[test]
    fn test_remap_links_rewrites_known_archive_references() {
        let new_id: models::Id = "08ab45cd12345678".parse().unwrap();
        let id_map = HashMap::from([("fedcba9876543210".to_string(), new_id)]);

        let content = "\
            See [child](Child%20fedcba9876543210.md) and \
            [unknown](Other%20aaaaaaaaaaaaaaaa.md) and \
            [external](https://example.com/x.md) and \
            [absolute](/pages/keepme)";
        let remapped = remap_links(content, &id_map);

        assert!(remapped.contains("[child](/pages/08ab45cd12345678)"));
        assert!(remapped.contains("[unknown](Other%20aaaaaaaaaaaaaaaa.md)"));
        assert!(remapped.contains("[external](https://example.com/x.md)"));
        assert!(remapped.contains("[absolute](/pages/keepme)"));
    }
}
