use crate::config::SearchConfig;
use crate::embedding::EmbeddingClient;
use crate::error::EngineResult;
use crate::store::StoreHandle;
use serde::Serialize;
use std::sync::Arc;

/// Scope constraints for a search. `files` and `folders` combine by
/// intersection; within each list, entries combine by union. An absent or
/// empty list imposes no constraint from that axis.
#[derive(Debug, Clone, Default)]
pub struct SearchScope {
    pub files: Option<Vec<String>>,
    pub folders: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub content: String,
    pub similarity: f32,
    pub start_line: usize,
    pub end_line: usize,
    pub file_url: String,
}

/// Embeds the query once and delegates ranking to the store; folder scoping
/// is applied in memory afterward since the store only understands exact
/// path matches (`scope.files`), not glob patterns.
pub struct RetrievalEngine {
    store: StoreHandle,
    embedder: Arc<dyn EmbeddingClient>,
    root: std::path::PathBuf,
    workspace_id: String,
}

impl RetrievalEngine {
    pub fn new(store: StoreHandle, embedder: Arc<dyn EmbeddingClient>, root: std::path::PathBuf, workspace_id: String) -> Self {
        Self {
            store,
            embedder,
            root,
            workspace_id,
        }
    }

    pub async fn search(
        &self,
        query: &str,
        min_similarity: Option<f32>,
        limit: Option<usize>,
        scope: SearchScope,
        defaults: &SearchConfig,
    ) -> EngineResult<Vec<SearchResult>> {
        let vector = self.embedder.embed(query).await?;
        let min_similarity = min_similarity.unwrap_or(defaults.min_similarity);
        let limit = limit.unwrap_or(defaults.max_results).min(defaults.max_chunks_per_query);

        let scope_files = scope.files.as_deref().filter(|f| !f.is_empty());
        let hits = self
            .store
            .similar(&self.workspace_id, self.embedder.id(), &vector, limit, min_similarity, scope_files)
            .await?;

        let folder_patterns = scope
            .folders
            .as_deref()
            .filter(|f| !f.is_empty())
            .map(|folders| folders.iter().map(|f| folder_to_glob(f)).collect::<Vec<_>>());

        let results = hits
            .into_iter()
            .filter(|hit| {
                folder_patterns
                    .as_ref()
                    .map(|patterns| patterns.iter().any(|p| glob_matches(p, &hit.path)))
                    .unwrap_or(true)
            })
            .map(|hit| SearchResult {
                file_url: format!("file://{}", self.root.join(&hit.path).to_string_lossy()),
                path: hit.path,
                content: hit.content,
                similarity: hit.similarity,
                start_line: hit.start_line,
                end_line: hit.end_line,
            })
            .collect();

        Ok(results)
    }
}

/// Converts a folder scope value to a glob pattern.
/// - Contains `*`: used verbatim.
/// - Starts with `/`: leading slash stripped, `/**` appended.
/// - Otherwise (bare name): prefixed `**/`, suffixed `/**`.
fn folder_to_glob(folder: &str) -> String {
    if folder.contains('*') {
        folder.to_string()
    } else if let Some(stripped) = folder.strip_prefix('/') {
        format!("{}/**", stripped.trim_end_matches('/'))
    } else {
        format!("**/{}/**", folder.trim_end_matches('/'))
    }
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    match globset::Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(path),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_becomes_double_star_wrapped() {
        assert_eq!(folder_to_glob("src"), "**/src/**");
    }

    #[test]
    fn leading_slash_is_stripped_and_suffixed() {
        assert_eq!(folder_to_glob("/src"), "src/**");
    }

    #[test]
    fn pattern_with_star_is_used_verbatim() {
        assert_eq!(folder_to_glob("src/*.rs"), "src/*.rs");
    }

    #[test]
    fn duplicate_folder_entries_match_same_set() {
        let a = folder_to_glob("src");
        let b = folder_to_glob("src");
        assert_eq!(a, b);
        assert!(glob_matches(&a, "src/main.rs"));
        assert!(glob_matches(&b, "src/main.rs"));
    }

    #[test]
    fn folder_glob_rejects_unrelated_path() {
        let pattern = folder_to_glob("src");
        assert!(!glob_matches(&pattern, "tests/main.rs"));
    }
}
