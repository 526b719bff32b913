//! Interpreting the output of a binary cat/dog classifier

use crate::preprocess::{self, ImageTensor};
use anyhow::{anyhow, bail, Result};
use image::DynamicImage;
use serde::Serialize;

/// A model that can run a forward pass on a preprocessed image
pub trait Classifier: Send + Sync {
    /// Identifier recorded with every logged run
    fn model_id(&self) -> &str;

    /// Run the model and return the output row for the single batch entry
    fn forward(&self, input: &ImageTensor) -> Result<Vec<f32>>;
}

/// The two classes the model distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Cat,
    Dog,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Cat => "cat",
            Label::Dog => "dog",
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of classifying one image. `confidence` is the raw probability
/// of the predicted class; the per-class probabilities are already rounded.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: Label,
    pub confidence: f64,
    pub cat_probability: f64,
    pub dog_probability: f64,
}

/// Round to 4 decimal digits
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Interpret a model output row. Two units are `(P(cat), P(dog))`, a single
/// unit is `P(dog)`. Dog only wins on a strict majority.
pub fn interpret(output: &[f32]) -> Result<Classification> {
    if output.iter().any(|v| !v.is_finite()) {
        bail!("model produced a non-finite output: {output:?}");
    }

    let (label, confidence) = match *output {
        [cat, dog] => {
            let (cat, dog) = (cat as f64, dog as f64);
            let label = if dog > cat { Label::Dog } else { Label::Cat };
            (label, cat.max(dog))
        }
        [dog] => {
            let dog = dog as f64;
            match dog > 0.5 {
                true => (Label::Dog, dog),
                false => (Label::Cat, 1.0 - dog),
            }
        }
        _ => {
            return Err(anyhow!(
                "expected a model output with 1 or 2 units, got {}",
                output.len()
            ))
        }
    };

    let (cat, dog) = match label {
        Label::Cat => (confidence, 1.0 - confidence),
        Label::Dog => (1.0 - confidence, confidence),
    };

    Ok(Classification {
        label,
        confidence,
        cat_probability: round4(cat),
        dog_probability: round4(dog),
    })
}

/// Preprocess `image`, run it through `model` and interpret the result
pub fn classify(model: &dyn Classifier, image: &DynamicImage) -> Result<Classification> {
    let tensor = preprocess::preprocess(image);
    let output = model.forward(&tensor)?;
    interpret(&output)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-6, "{a} != {b}");
    }

    fn assert_sums_to_one(c: &Classification) {
        assert!((c.cat_probability + c.dog_probability - 1.0).abs() < 1e-3);
        assert_close(
            round4(c.confidence),
            c.cat_probability.max(c.dog_probability),
        );
    }

    #[test]
    fn test_two_units_dog() {
        let c = interpret(&[0.3, 0.7]).unwrap();
        assert_eq!(c.label, Label::Dog);
        assert_close(round4(c.confidence), 0.7);
        assert_close(c.cat_probability, 0.3);
        assert_close(c.dog_probability, 0.7);
    }

    #[test]
    fn test_two_units_tie_is_cat() {
        let c = interpret(&[0.5, 0.5]).unwrap();
        assert_eq!(c.label, Label::Cat);
        assert_close(c.confidence, 0.5);
    }

    #[test]
    fn test_single_unit_dog() {
        let c = interpret(&[0.9]).unwrap();
        assert_eq!(c.label, Label::Dog);
        assert_close(round4(c.confidence), 0.9);
        assert_close(c.cat_probability, 0.1);
        assert_close(c.dog_probability, 0.9);
    }

    #[test]
    fn test_single_unit_boundary_is_cat() {
        let c = interpret(&[0.5]).unwrap();
        assert_eq!(c.label, Label::Cat);
        assert_close(c.confidence, 0.5);
    }

    #[test]
    fn test_single_unit_cat() {
        let c = interpret(&[0.25]).unwrap();
        assert_eq!(c.label, Label::Cat);
        assert_close(c.confidence, 0.75);
        assert_close(c.cat_probability, 0.75);
        assert_close(c.dog_probability, 0.25);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        for out in [
            vec![0.0f32],
            vec![1.0],
            vec![0.33333],
            vec![0.77777],
            vec![0.1, 0.9],
            vec![0.98765, 0.01235],
            vec![0.4999, 0.5001],
        ] {
            let c = interpret(&out).unwrap();
            assert_sums_to_one(&c);
            assert!(c.confidence >= 0.5);
        }
    }

    #[test]
    fn test_bad_outputs() {
        assert!(interpret(&[]).is_err());
        assert!(interpret(&[0.1, 0.2, 0.7]).is_err());
        assert!(interpret(&[f32::NAN]).is_err());
        assert!(interpret(&[0.5, f32::INFINITY]).is_err());
    }

    #[test]
    fn test_classify_runs_model_once() {
        let model = test::FixedClassifier::new(vec![0.2, 0.8]);
        let img = preprocess::decode(&preprocess::test::png_bytes(64, 48)).unwrap();
        let c = classify(&model, &img).unwrap();
        assert_eq!(c.label, Label::Dog);
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_label_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Label::Dog).unwrap(), "\"dog\"");
        assert_eq!(Label::Cat.to_string(), "cat");
    }
}
