//! Knowledge base tree layout and file writes.
//!
//! The kb directory is a plain Markdown tree, one directory per item at
//! `<main>/<sub>/<name>/`, with a `README.md` per item, a `_synthesis.md`
//! per sub-category, and a generated index at the root. All document writes
//! go through [`write_text_atomic`] so a crash never leaves a half-written
//! file in the tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use magpie_shared::{ItemRecord, MagpieError, Result};

/// File name of each item's generated document.
pub const ITEM_DOC_NAME: &str = "README.md";

/// File name of the per-sub-category synthesis document.
pub const SYNTHESIS_DOC_NAME: &str = "_synthesis.md";

/// File name of the generated root index.
pub const ROOT_INDEX_NAME: &str = "README.md";

// ---------------------------------------------------------------------------
// Path helpers (all relative to the kb root)
// ---------------------------------------------------------------------------

/// Directory holding one item's document and media copies.
pub fn item_dir(main: &str, sub: &str, name: &str) -> PathBuf {
    PathBuf::from(main).join(sub).join(name)
}

/// Path of one item's generated document.
pub fn item_doc_path(main: &str, sub: &str, name: &str) -> PathBuf {
    item_dir(main, sub, name).join(ITEM_DOC_NAME)
}

/// Path of a sub-category's synthesis document.
pub fn synthesis_doc_path(main: &str, sub: &str) -> PathBuf {
    PathBuf::from(main).join(sub).join(SYNTHESIS_DOC_NAME)
}

// ---------------------------------------------------------------------------
// Atomic writes
// ---------------------------------------------------------------------------

/// Write text to a file atomically: write to a hidden temp file in the same
/// directory, then rename over the target. Creates parent directories.
///
/// The temp name carries a random suffix because several items can
/// regenerate a shared file (the root index) concurrently.
pub async fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| MagpieError::validation(format!("path has no parent: {}", path.display())))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| MagpieError::io(parent, e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MagpieError::validation(format!("invalid file name: {}", path.display())))?;
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::now_v7().simple()));

    tokio::fs::write(&temp_path, content)
        .await
        .map_err(|e| MagpieError::io(&temp_path, e))?;
    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| MagpieError::io(path, e))?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Root index
// ---------------------------------------------------------------------------

/// Render the root `README.md` for the kb tree.
///
/// Lists every generated item grouped by main and sub category, in sorted
/// order so regeneration is deterministic. Sub-categories with a synthesis
/// link it above their item list.
pub fn generate_root_index(items: &[ItemRecord]) -> String {
    // main -> sub -> (has synthesis, [(name, doc path)])
    let mut tree: BTreeMap<&str, BTreeMap<&str, (bool, Vec<(&str, &str)>)>> = BTreeMap::new();
    let mut item_count = 0usize;

    for item in items {
        if !item.kb_item_generated {
            continue;
        }
        let (Some((main, sub, name)), Some(doc_path)) =
            (item.category(), item.kb_item_path.as_deref())
        else {
            continue;
        };
        let group = tree.entry(main).or_default().entry(sub).or_default();
        group.0 |= item.synthesized;
        group.1.push((name, doc_path));
        item_count += 1;
    }

    let mut out = String::from("# Knowledge Base\n");
    if tree.is_empty() {
        out.push_str("\nNo items yet.\n");
        return out;
    }

    out.push_str(&format!(
        "\n{item_count} item{} across {} categor{}.\n",
        if item_count == 1 { "" } else { "s" },
        tree.len(),
        if tree.len() == 1 { "y" } else { "ies" },
    ));

    for (main, subs) in &tree {
        out.push_str(&format!("\n## {main}\n"));
        for (sub, (has_synthesis, entries)) in subs {
            out.push_str(&format!("\n### {sub}\n\n"));
            if *has_synthesis {
                let path = synthesis_doc_path(main, sub);
                out.push_str(&format!("[Overview]({})\n\n", path.display()));
            }
            let mut entries = entries.clone();
            entries.sort();
            for (name, doc_path) in entries {
                out.push_str(&format!("- [{name}]({doc_path})\n"));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated_item(id: &str, main: &str, sub: &str, name: &str) -> ItemRecord {
        let mut record = ItemRecord::new(id, format!("https://x.com/u/status/{id}"));
        record.main_category = Some(main.to_string());
        record.sub_category = Some(sub.to_string());
        record.item_name = Some(name.to_string());
        record.kb_item_generated = true;
        record.kb_item_path = Some(item_doc_path(main, sub, name).display().to_string());
        record
    }

    #[test]
    fn path_layout() {
        assert_eq!(
            item_doc_path("rust", "async-programming", "async-io-tips"),
            PathBuf::from("rust/async-programming/async-io-tips/README.md")
        );
        assert_eq!(
            synthesis_doc_path("rust", "async-programming"),
            PathBuf::from("rust/async-programming/_synthesis.md")
        );
    }

    #[test]
    fn index_groups_and_sorts() {
        let items = vec![
            generated_item("3", "tooling", "git", "rebase-workflows"),
            generated_item("1", "rust", "async-programming", "select-pitfalls"),
            generated_item("2", "rust", "async-programming", "async-io-tips"),
        ];
        let index = generate_root_index(&items);

        assert!(index.contains("3 items across 2 categories."));
        assert!(index.contains("## rust"));
        assert!(index.contains("### async-programming"));
        assert!(index.contains("- [async-io-tips](rust/async-programming/async-io-tips/README.md)"));

        // Sorted: "rust" before "tooling", "async-io-tips" before "select-pitfalls".
        let rust_pos = index.find("## rust").expect("rust heading");
        let tooling_pos = index.find("## tooling").expect("tooling heading");
        assert!(rust_pos < tooling_pos);
        let io_pos = index.find("[async-io-tips]").expect("io entry");
        let select_pos = index.find("[select-pitfalls]").expect("select entry");
        assert!(io_pos < select_pos);
    }

    #[test]
    fn index_skips_ungenerated_items() {
        let mut pending = ItemRecord::new("9", "https://x.com/u/status/9");
        pending.main_category = Some("rust".into());
        pending.sub_category = Some("macros".into());
        pending.item_name = Some("derive-tricks".into());

        let items = vec![pending, generated_item("1", "rust", "macros", "hygiene-basics")];
        let index = generate_root_index(&items);

        assert!(index.contains("1 item across 1 category."));
        assert!(!index.contains("derive-tricks"));
    }

    #[test]
    fn index_links_synthesis_when_present() {
        let mut item = generated_item("1", "rust", "async-programming", "async-io-tips");
        item.synthesized = true;
        let index = generate_root_index(&[item]);
        assert!(index.contains("[Overview](rust/async-programming/_synthesis.md)"));
    }

    #[test]
    fn empty_index() {
        let index = generate_root_index(&[]);
        assert!(index.contains("No items yet."));
    }

    #[tokio::test]
    async fn atomic_write_creates_parents_and_cleans_up() {
        let dir = std::env::temp_dir().join(format!("magpie_kb_test_{}", uuid::Uuid::now_v7()));
        let target = dir.join("rust").join("async-programming").join("README.md");

        write_text_atomic(&target, "# First\n").await.expect("first write");
        write_text_atomic(&target, "# Second\n").await.expect("overwrite");

        let content = tokio::fs::read_to_string(&target).await.expect("read back");
        assert_eq!(content, "# Second\n");

        // No temp files left behind next to the target.
        let mut entries = tokio::fs::read_dir(target.parent().expect("parent"))
            .await
            .expect("read dir");
        while let Some(entry) = entries.next_entry().await.expect("next entry") {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            assert!(!name.starts_with('.'), "leftover temp file: {name}");
        }

        tokio::fs::remove_dir_all(&dir).await.expect("cleanup");
    }
}
