use burn::{backend::NdArray, prelude::*, tensor::Distribution};
use semseg_burn::{
    build_model, model_weights, model_zoo, BackboneWeights, ModelOptions, WeightsConfig,
};

type TestBackend = NdArray<f32>;

const INPUT_SHAPES: [[usize; 4]; 3] = [[2, 3, 64, 64], [2, 3, 61, 63], [2, 3, 65, 67]];

fn check_model(name: &str, aux_loss: bool) {
    let device = Default::default();
    let options = ModelOptions::new()
        .with_aux_loss(Some(aux_loss))
        .with_weights_backbone(BackboneWeights::None);
    let model = build_model::<TestBackend>(name, &options, &WeightsConfig::new(), &device)
        .unwrap_or_else(|e| panic!("{name}: {e}"));

    for shape in INPUT_SHAPES {
        let input = Tensor::<TestBackend, 4>::random(shape, Distribution::Default, &device);
        let output = model.forward(input);

        let expected_keys = if aux_loss { vec!["out", "aux"] } else { vec!["out"] };
        assert_eq!(output.keys(), expected_keys, "{name}");

        for key in output.keys() {
            let dims = output.get(key).map(|t| t.dims());
            assert_eq!(dims, Some([2, 21, shape[2], shape[3]]), "{name} {key} {shape:?}");
        }
    }
}

#[test]
fn registry_weights_are_registered_models() {
    assert!(!model_zoo().is_empty());
    for name in model_weights().keys() {
        assert!(model_zoo().contains_key(name), "{name}");
    }
}

#[test]
fn every_model_keeps_input_size() {
    for name in model_zoo().keys() {
        check_model(name, false);
    }
}

#[test]
fn every_model_keeps_input_size_with_aux() {
    for name in model_zoo().keys() {
        check_model(name, true);
    }
}
