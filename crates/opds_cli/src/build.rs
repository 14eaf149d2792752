//! `opds build`: incremental catalog generation.
//!
//! Loads the profile and the metadata export, starts a catalog run and
//! drives every stage through [`LibraryStages`]. Files whose checksum is
//! unchanged since the previous run are not copied again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use opds_catalog::{BuildError, BuildOrchestrator, MemoryLibrary, RunOutcome, StopHandle};
use opds_config::Profile;

use crate::library::load_library;
use crate::listener::TerminalListener;
use crate::stages::LibraryStages;
use crate::{BuildArgs, GlobalArgs};

/// Exit code for a run interrupted by a stop request.
pub const EXIT_STOPPED: i32 = 2;

/// Runs the `opds build` command.
///
/// Returns 0 on success, 1 when a stage failed and [`EXIT_STOPPED`] when
/// the run was stopped by SIGINT or SIGTERM. A second signal while the
/// stop is pending exits at once.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let profile_path = global.profile_path();
    let mut profile = global.load_profile()?;
    apply_overrides(&mut profile, args);

    if args.fresh {
        clear_cache(&profile.catalog_root());
    }

    let library = load_library(&profile.metadata_path())?;
    let output_root = profile.output.root.clone();

    if !global.quiet {
        eprintln!(
            "   Building {} books into {}",
            library.books.len(),
            output_root.display()
        );
    }

    let listener = Arc::new(TerminalListener::new(global.quiet, global.verbose));
    let stored_code = profile.output.security_code.clone();
    let outcome = build_catalog(&output_root, &mut profile, library, listener, true)?;

    if profile.output.security_code != stored_code {
        opds_config::save_profile(&profile_path, &profile)
            .map_err(|e| format!("cannot save profile {}: {e}", profile_path.display()))?;
        tracing::info!(path = %profile_path.display(), "security code stored in profile");
    }

    match &outcome {
        Ok(RunOutcome::Completed { warnings }) if !global.quiet => {
            eprintln!("  Finished with {warnings} warning(s)");
        }
        Ok(RunOutcome::Stopped { stage }) => eprintln!("  Stopped during {stage}"),
        _ => {}
    }
    Ok(exit_code(&outcome))
}

/// Process exit code for a finished stage sequence.
fn exit_code(outcome: &Result<RunOutcome, BuildError>) -> i32 {
    match outcome {
        Ok(RunOutcome::Completed { .. }) => 0,
        Ok(RunOutcome::Stopped { .. }) => EXIT_STOPPED,
        // Already reported by the listener.
        Err(_) => 1,
    }
}

/// Makes SIGINT and SIGTERM request a stop at the next checkpoint.
fn watch_stop_signals(stop: &StopHandle) -> std::io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};

    let flag = stop.flag();
    for signal in [SIGINT, SIGTERM] {
        // Registered first so it sees the flag before this signal sets it.
        signal_hook::flag::register_conditional_shutdown(signal, 1, Arc::clone(&flag))?;
        signal_hook::flag::register(signal, Arc::clone(&flag))?;
    }
    Ok(())
}

/// Applies command-line overrides to the loaded profile.
fn apply_overrides(profile: &mut Profile, args: &BuildArgs) {
    if let Some(output) = &args.output {
        profile.output.root = PathBuf::from(output);
    }
    if let Some(metadata) = &args.metadata {
        // An absolute path replaces the library-relative one on join.
        profile.library.metadata_file = PathBuf::from(metadata);
    }
}

/// Deletes the persisted checksum cache kept in `catalog_root`.
pub fn clear_cache(catalog_root: &Path) {
    let mut cache = opds_cache::ChecksumCache::new();
    cache.configure_location(catalog_root);
    cache.delete_all();
}

/// Begins a run over `library` and executes every stage.
///
/// With `stop_on_signal`, SIGINT and SIGTERM stop the run at its next
/// checkpoint. The outer error covers run setup; the inner result is the
/// stage sequence, whose failures have already been reported to `listener`.
pub fn build_catalog(
    output_root: &Path,
    profile: &mut Profile,
    library: MemoryLibrary,
    listener: Arc<TerminalListener>,
    stop_on_signal: bool,
) -> Result<Result<RunOutcome, BuildError>, BuildError> {
    let mut orchestrator = BuildOrchestrator::new(listener);
    orchestrator.begin_run(output_root, profile, Arc::new(library))?;
    if stop_on_signal {
        if let Err(e) = watch_stop_signals(&orchestrator.stop_handle()) {
            tracing::warn!(error = %e, "stop signals not handled; interrupting kills the build");
        }
    }
    let mut stages = LibraryStages::new();
    Ok(orchestrator.execute(&mut stages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opds_cache::CACHE_FILE_NAME;
    use opds_common::{Book, Tag};

    struct Fixture {
        _dir: tempfile::TempDir,
        library_root: PathBuf,
        output_root: PathBuf,
        profile: Profile,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let library_root = dir.path().join("library");
        let output_root = dir.path().join("site");
        let mut profile = Profile::default();
        profile.library.root = library_root.clone();
        profile.output.root = output_root.clone();
        Fixture {
            _dir: dir,
            library_root,
            output_root,
            profile,
        }
    }

    fn book_with_files(root: &Path, id: u64, title: &str, tag: &str) -> Book {
        let folder = root.join(format!("Some Author/{title} ({id})"));
        std::fs::create_dir_all(&folder).unwrap();
        let epub = folder.join(format!("{title}.epub"));
        std::fs::write(&epub, format!("epub {title}")).unwrap();
        let cover = folder.join("cover.jpg");
        std::fs::write(&cover, format!("jpeg {title}")).unwrap();
        Book {
            id,
            title: title.to_string(),
            authors: vec!["Some Author".to_string()],
            tags: vec![Tag::new(id, tag)],
            timestamp: Some(format!("2024-01-0{id}T00:00:00+00:00")),
            cover: Some(cover),
            formats: vec![epub],
            ..Default::default()
        }
    }

    fn library(books: Vec<Book>) -> MemoryLibrary {
        MemoryLibrary::from_books(books, None)
    }

    fn quiet() -> Arc<TerminalListener> {
        Arc::new(TerminalListener::new(true, false))
    }

    #[test]
    fn overrides_replace_profile_paths() {
        let mut profile = Profile::default();
        let args = BuildArgs {
            output: Some("/srv/opds".to_string()),
            metadata: Some("/tmp/export.json".to_string()),
            fresh: false,
        };
        apply_overrides(&mut profile, &args);
        assert_eq!(profile.output.root, PathBuf::from("/srv/opds"));
        assert_eq!(profile.metadata_path(), PathBuf::from("/tmp/export.json"));
    }

    #[test]
    fn build_writes_feeds_images_and_library() {
        let mut fx = fixture();
        let books = vec![
            book_with_files(&fx.library_root, 1, "Dune", "Science Fiction"),
            book_with_files(&fx.library_root, 2, "Emma", "Classic"),
        ];
        let outcome = build_catalog(&fx.output_root, &mut fx.profile, library(books), quiet(), false)
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));

        let catalog = fx.output_root.join("catalog");
        for doc in ["index.json", "tags.json", "authors.json", "all.json", "recent.json"] {
            assert!(catalog.join(doc).is_file(), "{doc} missing");
        }
        assert!(catalog.join("Tags/Classic.json").is_file());
        assert!(catalog.join("images/1/cover.jpg").is_file());
        assert!(fx
            .output_root
            .join("Some Author/Dune (1)/Dune.epub")
            .is_file());
        assert!(catalog.join(CACHE_FILE_NAME).is_file());

        let index: serde_json::Value =
            serde_json::from_slice(&std::fs::read(catalog.join("index.json")).unwrap()).unwrap();
        let titles: Vec<&str> = index["navigation"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["title"].as_str().unwrap())
            .collect();
        assert!(titles.contains(&"Tags"));
        assert!(titles.contains(&"All books"));
    }

    #[test]
    fn forbidden_tags_hide_books() {
        let mut fx = fixture();
        fx.profile.catalog.forbidden_tags = vec!["secret".to_string()];
        let books = vec![
            book_with_files(&fx.library_root, 1, "Dune", "Science Fiction"),
            book_with_files(&fx.library_root, 2, "Diary", "Secret"),
        ];
        build_catalog(&fx.output_root, &mut fx.profile, library(books), quiet(), false)
            .unwrap()
            .unwrap();

        let catalog = fx.output_root.join("catalog");
        assert!(!catalog.join("Tags/Secret.json").exists());
        assert!(!fx.output_root.join("Some Author/Diary (2)").exists());
    }

    #[test]
    fn crypt_filenames_hides_every_document_and_stores_the_code() {
        let mut fx = fixture();
        fx.profile.output.crypt_filenames = true;
        fx.profile.custom_catalogs.insert("Picks".to_string(), vec!["Science Fiction".to_string()]);
        let books = vec![book_with_files(&fx.library_root, 1, "Dune", "Science Fiction")];
        build_catalog(&fx.output_root, &mut fx.profile, library(books), quiet(), false)
            .unwrap()
            .unwrap();

        let code = fx.profile.output.security_code.clone().unwrap();
        assert!(!code.is_empty());
        let catalog = fx.output_root.join("catalog");
        assert!(catalog.join(format!("{code}_index.json")).is_file());
        assert!(catalog.join(format!("{code}_all.json")).is_file());
        assert!(catalog.join(format!("Tags/{code}_Science Fiction.json")).is_file());
        assert!(catalog.join(format!("images/1/{code}_cover.jpg")).is_file());

        let mut exposed = Vec::new();
        let mut pending = vec![catalog.clone()];
        while let Some(folder) = pending.pop() {
            for entry in std::fs::read_dir(&folder).unwrap() {
                let path = entry.unwrap().path();
                let name = path.file_name().unwrap().to_string_lossy().into_owned();
                if path.is_dir() {
                    pending.push(path);
                } else if name != CACHE_FILE_NAME && !name.starts_with(&format!("{code}_")) {
                    exposed.push(path);
                }
            }
        }
        assert!(exposed.is_empty(), "guessable files: {exposed:?}");

        let index: serde_json::Value = serde_json::from_slice(
            &std::fs::read(catalog.join(format!("{code}_index.json"))).unwrap(),
        )
        .unwrap();
        let hrefs: Vec<&str> = index["navigation"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["href"].as_str().unwrap())
            .collect();
        assert!(hrefs.contains(&format!("./{code}_tags.json").as_str()));
    }

    #[test]
    fn tags_that_flatten_alike_get_separate_feeds() {
        let mut fx = fixture();
        let books = vec![
            book_with_files(&fx.library_root, 1, "Dune", "Sci-Fi/Fantasy"),
            book_with_files(&fx.library_root, 2, "Emma", "Sci-Fi_Fantasy"),
        ];
        build_catalog(&fx.output_root, &mut fx.profile, library(books), quiet(), false)
            .unwrap()
            .unwrap();

        let catalog = fx.output_root.join("catalog");
        let read = |doc: &str| -> serde_json::Value {
            serde_json::from_slice(&std::fs::read(catalog.join(doc)).unwrap()).unwrap()
        };
        let tags = read("tags.json");
        let mut hrefs: Vec<&str> = tags["navigation"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["href"].as_str().unwrap())
            .collect();
        hrefs.sort_unstable();
        hrefs.dedup();
        assert_eq!(hrefs.len(), 2);

        let titles: Vec<String> = ["Tags/Sci-Fi_Fantasy.json", "Tags/Sci-Fi_Fantasy_2.json"]
            .iter()
            .map(|doc| read(doc)["publications"][0]["metadata"]["title"].as_str().unwrap().to_string())
            .collect();
        assert!(titles.contains(&"Dune".to_string()));
        assert!(titles.contains(&"Emma".to_string()));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(exit_code(&Ok(RunOutcome::Completed { warnings: 3 })), 0);
        assert_eq!(
            exit_code(&Ok(RunOutcome::Stopped {
                stage: opds_catalog::Stage::CopyLibrary
            })),
            EXIT_STOPPED
        );
        assert_eq!(exit_code(&Err(BuildError::Stopped)), 1);
    }

    #[cfg(unix)]
    #[test]
    fn interrupt_requests_a_stop() {
        let stop = StopHandle::new();
        watch_stop_signals(&stop).unwrap();
        assert!(!stop.is_stop_requested());
        signal_hook::low_level::raise(signal_hook::consts::SIGINT).unwrap();
        assert!(stop.is_stop_requested());
    }

    #[test]
    fn cleared_cache_is_rebuilt_on_next_run() {
        let mut fx = fixture();
        let books = vec![book_with_files(&fx.library_root, 1, "Dune", "Science Fiction")];
        build_catalog(&fx.output_root, &mut fx.profile, library(books.clone()), quiet(), false)
            .unwrap()
            .unwrap();
        let catalog = fx.output_root.join("catalog");
        assert!(catalog.join(CACHE_FILE_NAME).is_file());

        clear_cache(&catalog);
        assert!(!catalog.join(CACHE_FILE_NAME).exists());

        let outcome = build_catalog(&fx.output_root, &mut fx.profile, library(books), quiet(), false)
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert!(catalog.join(CACHE_FILE_NAME).is_file());
    }

    #[test]
    fn unwritable_output_root_fails_setup() {
        let mut fx = fixture();
        let blocker = fx.output_root.clone();
        std::fs::create_dir_all(blocker.parent().unwrap()).unwrap();
        std::fs::write(&blocker, b"not a folder").unwrap();
        let err = build_catalog(&blocker, &mut fx.profile, library(Vec::new()), quiet(), false).unwrap_err();
        assert!(matches!(err, BuildError::OutputRoot { .. }));
    }
}
