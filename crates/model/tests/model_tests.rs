//! framenet-model integration tests
//!
//! Snapshot directories on disk, the reference two-table architecture and
//! interpolation properties.

use framenet_fixed_point::Tensor;
use framenet_model::{
    save_directory, ArchitectureConfig, Batch, BatchSource, ClipRange, EmbeddingBatch,
    EmbeddingQuery, EmbeddingConfig, EmbeddingTable, FeatureSource, Layer, LoaderGuard, Model,
    ModelError, SafetensorsLoader,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

fn two_table_config() -> ArchitectureConfig {
    ArchitectureConfig {
        embeddings: vec![
            EmbeddingConfig {
                embedding_dim: 20,
                resolution_ratio: 1,
                tensor_prefix: None,
            },
            EmbeddingConfig {
                embedding_dim: 44,
                resolution_ratio: 4,
                tensor_prefix: None,
            },
        ],
        hidden_sizes: vec![128, 96],
        ..Default::default()
    }
}

// =============================================================================
// Section 1: Snapshot directories
// =============================================================================

mod snapshot_tests {
    use super::*;

    #[test]
    fn test_directory_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = ArchitectureConfig::default();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let model = Model::random(&config, &config, &mut rng).unwrap();

        save_directory(&model, &config, dir.path()).unwrap();
        let loader = SafetensorsLoader::from_directory(dir.path()).unwrap();
        assert_eq!(loader.config, config);
        assert_eq!(loader.load_model(&loader.config).unwrap(), model);
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SafetensorsLoader::from_directory(dir.path().join("nope"));
        assert!(matches!(result, Err(ModelError::Io(_))));
    }

    #[test]
    fn test_architecture_mismatch_is_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ArchitectureConfig::default();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let model = Model::random(&config, &config, &mut rng).unwrap();
        save_directory(&model, &config, dir.path()).unwrap();

        let wider = ArchitectureConfig {
            hidden_sizes: vec![128, 120],
            ..config
        };
        wider.to_json_file(dir.path().join("config.json")).unwrap();

        let loader = SafetensorsLoader::from_directory(dir.path()).unwrap();
        assert!(matches!(
            loader.load_model(&loader.config),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }
}

// =============================================================================
// Section 2: Reference architecture
// =============================================================================

mod architecture_tests {
    use super::*;

    /// Discovery answered by an external library rather than the config
    struct Discovery;

    impl FeatureSource for Discovery {
        fn point_dims(&self) -> usize {
            40
        }

        fn embedding_count(&self) -> usize {
            820
        }
    }

    #[test]
    fn test_two_table_shapes() {
        let config = two_table_config();
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let model = Model::random(&config, &config, &mut rng).unwrap();

        let shapes: Vec<Vec<usize>> = model
            .layers()
            .iter()
            .map(|l| match &l.layer {
                Layer::Embedding(t) => t.weight().shape().to_vec(),
                Layer::Linear(w) => w.weight().shape().to_vec(),
            })
            .collect();
        assert_eq!(
            shapes,
            vec![
                vec![820, 20],
                vec![205, 44],
                vec![128, 56 + 64],
                vec![96, 128],
                vec![1, 96],
            ]
        );
        assert_eq!(model.point_dims(), 56);
    }

    #[test]
    fn test_feature_source_drives_shapes() {
        let config = two_table_config();
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let model = Model::random(&config, &Discovery, &mut rng).unwrap();
        assert_eq!(model.point_dims(), 40);
        assert_eq!(model.linears().next().unwrap().in_features(), 40 + 64);
    }

    #[test]
    fn test_clip_copy_leaves_source_model() {
        let config = ArchitectureConfig::default();
        let mut rng = ChaCha20Rng::seed_from_u64(8);
        let model = Model::random(&config, &config, &mut rng).unwrap();
        let model = model
            .with_tensor("l2", "bias", Tensor::vector(vec![3.0]))
            .unwrap();

        let clip = ClipRange::new(1.0, 1.0).unwrap();
        let clipped = model.clipped(clip);
        assert_eq!(clipped.linears().last().unwrap().bias().unwrap().data(), &[1.0]);
        assert_eq!(model.linears().last().unwrap().bias().unwrap().data(), &[3.0]);
    }
}

// =============================================================================
// Section 3: Batch source boundary
// =============================================================================

mod batch_tests {
    use super::*;

    /// Deterministic source: the same seed yields the same batches
    struct SeededSource {
        rng: ChaCha20Rng,
    }

    impl FeatureSource for SeededSource {
        fn point_dims(&self) -> usize {
            56
        }

        fn embedding_count(&self) -> usize {
            820
        }
    }

    impl BatchSource for SeededSource {
        fn next_batch(&mut self, batch: &mut Batch) -> framenet_model::Result<()> {
            use rand::Rng;
            batch.points.iter_mut().for_each(|p| *p = self.rng.gen_range(-1.0..1.0));
            if let Some(EmbeddingBatch::Queries(q)) = &mut batch.embeddings {
                q.iter_mut().for_each(|x| *x = self.rng.gen_range(0.0..820.0));
            }
            batch.targets.iter_mut().for_each(|t| *t = self.rng.gen_range(0.0..1.0));
            Ok(())
        }
    }

    fn fill(seed: u64) -> Batch {
        let mut guard = LoaderGuard::new(SeededSource {
            rng: ChaCha20Rng::seed_from_u64(seed),
        });
        let mut batch = Batch::zeroed(4, 56, Some(EmbeddingBatch::Queries(vec![0.0; 4])));
        guard.next_batch(&mut batch).unwrap();
        batch
    }

    #[test]
    fn test_batches_are_reproducible() {
        assert_eq!(fill(3), fill(3));
        assert_ne!(fill(3), fill(4));
    }

    #[test]
    fn test_forward_batch_from_source() {
        let config = ArchitectureConfig::default();
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let model = Model::random(&config, &config, &mut rng).unwrap();

        let out = model.forward_batch(&fill(1), config.input_range).unwrap();
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|o| o.len() == 1 && o[0] > 0.0 && o[0] < 1.0));
    }

    #[test]
    fn test_non_finite_query_rejected() {
        let config = ArchitectureConfig::default();
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let model = Model::random(&config, &config, &mut rng).unwrap();
        assert!(matches!(
            model.embed(EmbeddingQuery::Index(f32::NAN)),
            Err(ModelError::NonFiniteQuery(_))
        ));
    }
}

// =============================================================================
// Section 4: Interpolation properties
// =============================================================================

mod interpolation_props {
    use super::*;
    use proptest::prelude::*;

    fn table(rows: usize, cols: usize, seed: u64) -> EmbeddingTable {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        EmbeddingTable::random(rows, cols, 1, &mut rng).unwrap()
    }

    proptest! {
        #[test]
        fn prop_integer_query_is_row(rows in 1usize..32, cols in 1usize..8, seed: u64, pick: usize) {
            let t = table(rows, cols, seed);
            let i = pick % rows;
            prop_assert_eq!(t.interpolate(i as f32).unwrap(), t.row(i).unwrap().to_vec());
        }

        #[test]
        fn prop_past_end_is_last_row(rows in 1usize..32, seed: u64, extra in 0.0f32..1000.0) {
            let t = table(rows, 3, seed);
            let last = t.row(rows - 1).unwrap().to_vec();
            prop_assert_eq!(t.interpolate((rows - 1) as f32 + extra).unwrap(), last);
        }

        #[test]
        fn prop_result_between_neighbours(rows in 2usize..32, seed: u64, q in 0.0f32..31.0) {
            let t = table(rows, 4, seed);
            let q = q.min((rows - 1) as f32);
            let i0 = q.floor() as usize;
            let i1 = (i0 + 1).min(rows - 1);
            let out = t.interpolate(q).unwrap();
            let (a, b) = (t.row(i0).unwrap(), t.row(i1).unwrap());
            for k in 0..4 {
                let (lo, hi) = (a[k].min(b[k]), a[k].max(b[k]));
                prop_assert!(out[k] >= lo - 1e-6 && out[k] <= hi + 1e-6);
            }
        }
    }
}
