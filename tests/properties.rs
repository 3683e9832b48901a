//! Property-based tests for ordering, threshold filtering, dimension
//! enforcement and persistence.

use proptest::prelude::*;
use sentencedb::index::{persistence, IndexBuilder};
use sentencedb::{CancellationFlag, Config, IndexKind, SentenceDB, SentenceId};
use tempfile::tempdir;

const DIM: usize = 6;

fn vector() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..1.0, DIM)
}

fn corpus() -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(vector(), 1..40)
}

fn populated(vectors: &[Vec<f32>]) -> (SentenceDB, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let db = SentenceDB::open(dir.path().join("prop.db"), Config::default()).unwrap();
    let doc = db.add_document("p.md", "/p.md").unwrap();
    for (i, v) in vectors.iter().enumerate() {
        db.add_sentence_embedding(doc, &format!("s{}", i), i as u32, v)
            .unwrap();
    }
    (db, dir)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_all_embeddings_ascending_and_stable(vectors in corpus()) {
        let (db, _dir) = populated(&vectors);

        let first = db.all_embeddings().unwrap();
        let second = db.all_embeddings().unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert!(first.windows(2).all(|w| w[0].0 < w[1].0));

        let stored: Vec<Vec<f32>> = first.into_iter().map(|(_, v)| v).collect();
        prop_assert_eq!(stored, vectors);
    }

    #[test]
    fn prop_higher_threshold_returns_subset(
        vectors in corpus(),
        query in vector(),
        t1 in -2.0f32..2.0,
        delta in 0.0f32..2.0,
    ) {
        let (db, _dir) = populated(&vectors);
        db.build_index(IndexKind::Flat).unwrap();

        let t2 = t1 + delta;
        let low = db.search(&query, vectors.len(), t1).unwrap().into_results();
        let high = db.search(&query, vectors.len(), t2).unwrap().into_results();

        prop_assert!(high.len() <= low.len());
        for hit in &high {
            prop_assert!(hit.score >= t2);
            prop_assert!(low.iter().any(|l| l.sentence_id == hit.sentence_id));
        }
        prop_assert!(low.windows(2).all(|w| w[0].score >= w[1].score));
        prop_assert!(low.iter().enumerate().all(|(i, r)| r.rank == i + 1));
    }

    #[test]
    fn prop_wrong_dimension_leaves_counts_unchanged(
        vectors in prop::collection::vec(vector(), 1..5),
        bad_len in (1usize..12).prop_filter("must differ", |n| *n != DIM),
    ) {
        let (db, _dir) = populated(&vectors);
        let before = db.stats().unwrap();
        let doc = db.add_document("p.md", "/p.md").unwrap();

        let err = db
            .add_sentence_embedding(doc, "bad", 1_000, &vec![0.5f32; bad_len])
            .unwrap_err();
        prop_assert!(err.is_dimension_mismatch());
        prop_assert_eq!(db.stats().unwrap(), before);
    }

    #[test]
    fn prop_persisted_index_answers_identically(
        vectors in corpus(),
        query in vector(),
        k in 1usize..10,
        ivf in any::<bool>(),
    ) {
        let kind = if ivf { IndexKind::InvertedFile } else { IndexKind::Flat };
        let ids: Vec<SentenceId> = (1..=vectors.len() as u64).map(SentenceId::new).collect();
        let index = IndexBuilder::new(kind)
            .build(ids, &vectors, &CancellationFlag::new())
            .unwrap();

        let dir = tempdir().unwrap();
        persistence::save(&index, dir.path(), "prop").unwrap();
        let loaded = persistence::load(dir.path(), "prop").unwrap();

        let before = index.search(&query, k).unwrap();
        let after = loaded.search(&query, k).unwrap();
        prop_assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            prop_assert_eq!(a.ordinal, b.ordinal);
            prop_assert_eq!(a.score.to_bits(), b.score.to_bits());
        }
        prop_assert_eq!(loaded.id_mapping(), index.id_mapping());
    }
}
