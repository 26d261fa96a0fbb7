use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use chrono::Utc;

use kicklab::artifact::{ArtifactStore, LiveModel};
use kicklab::error::PipelineError;
use kicklab::history;
use kicklab::synthetic::{SyntheticConfig, generate_corpus};
use kicklab::training::{TrainingConfig, train_artifact};

fn temp_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "kicklab_it_{tag}_{}_{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or(0)
    ))
}

#[test]
fn trained_artifact_survives_store_round_trip() {
    let corpus = generate_corpus(&SyntheticConfig {
        n_matches: 240,
        ..SyntheticConfig::default()
    });
    let artifact = train_artifact(&corpus, &TrainingConfig::quick(), Utc::now()).unwrap();
    assert_eq!(artifact.members.len(), 4);
    assert!(artifact.training.as_ref().unwrap().corpus.starts_with("synthetic"));

    let dir = temp_path("store");
    let store = ArtifactStore::new(&dir);
    store.save(&artifact).unwrap();
    store.promote(&artifact.id).unwrap();
    let live = store.load_live().unwrap().unwrap();
    assert_eq!(live.id, artifact.id);
    assert_eq!(live.manifest, artifact.manifest);
    assert_eq!(live.effective_weights().len(), artifact.members.len());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn dangling_live_pointer_blocks_serving() {
    let dir = temp_path("dangling");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("LIVE"), "20260101-000000-deadbeef").unwrap();
    let store = ArtifactStore::new(&dir);
    assert!(matches!(store.load_live(), Err(PipelineError::Artifact(_))));
    assert!(store.promote("20260101-000000-deadbeef").is_err());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn readers_see_whole_artifacts_during_swaps() {
    let corpus = generate_corpus(&SyntheticConfig {
        n_matches: 240,
        ..SyntheticConfig::default()
    });
    let a = train_artifact(&corpus, &TrainingConfig::quick(), Utc::now()).unwrap();
    let b = train_artifact(&corpus[..200], &TrainingConfig::quick(), Utc::now()).unwrap();
    let ids = [a.id.clone(), b.id.clone()];
    let live = Arc::new(LiveModel::with(a.clone()));

    let reader = {
        let live = live.clone();
        let ids = ids.clone();
        thread::spawn(move || {
            for _ in 0..2_000 {
                let current = live.current().unwrap();
                assert!(ids.contains(&current.id));
                assert!(current.validate().is_ok());
            }
        })
    };
    for i in 0..200 {
        live.swap(if i % 2 == 0 { b.clone() } else { a.clone() });
    }
    reader.join().unwrap();
}

#[test]
fn csv_rows_land_in_history_store() {
    let csv = "\u{feff}Div,Date,HomeTeam,AwayTeam,FTHG,FTAG,B365H,B365D,B365A\n\
               E0,16/08/24,Man United,Fulham,1,0,1.60,4.20,5.25\n\
               E0,17/08/2024,Ipswich,Liverpool,0,2,7.50,5.00,1.40\n\
               E0,,Nobody,Else,1,1,2.0,3.0,4.0\n\
               E0,24/08/24,\"Brighton, Hove\",Man United,2,1,,,\n";
    let (rows, errors) = history::parse_football_data_csv(csv, "E0", "2024-25").unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(errors.len(), 1);
    assert_eq!(rows[0].match_date.to_string(), "2024-08-16");
    assert_eq!(rows[1].match_date.to_string(), "2024-08-17");
    assert_eq!(rows[2].home_team, "Brighton, Hove");
    assert!(rows[2].odds.is_none());

    let path = temp_path("history").with_extension("sqlite");
    let mut conn = history::open_db(&path).unwrap();
    history::upsert_matches(&mut conn, &rows).unwrap();
    // Re-ingesting the same file does not duplicate matches.
    history::upsert_matches(&mut conn, &rows).unwrap();
    let loaded = history::load_finished_matches(&conn, Some("E0")).unwrap();
    assert_eq!(loaded.len(), 3);
    assert!(loaded.iter().all(|m| !m.synthetic));
    assert_eq!(
        history::latest_match_date(&conn).unwrap().map(|d| d.to_string()),
        Some("2024-08-24".to_string())
    );
    drop(conn);
    let _ = fs::remove_file(&path);
}
