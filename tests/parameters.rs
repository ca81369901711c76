use rand::prelude::*;
use std::sync::Arc;
use xspex::{
    Bounds, CombinationRule, Dataset, FitError, FitSession, LocalOptimizer, ModelRegistry,
    Parameter, ParameterError, ParameterSpace, ParameterStatus, SessionError, SessionState,
    TieExpr,
};
use xspex_test_util::{diagonal_response, synthetic_spectrum};

fn two_power_laws() -> (Arc<ModelRegistry>, FitSession) {
    let registry = Arc::new(ModelRegistry::with_builtin_models());
    let model = registry
        .compose(&["power_law", "power_law"], CombinationRule::Additive)
        .unwrap();
    let response = diagonal_response(0.5, 10.0, 80, 100.0);
    let mut rng = StdRng::seed_from_u64(11);
    let truth = [3.0, 1.5, 0.5, 2.5];
    let spectrum = synthetic_spectrum(&mut rng, &model, &response, &truth, 100.0);
    let session = FitSession::builder(registry.clone())
        .model(model)
        .dataset(Dataset::new(Arc::new(spectrum), response))
        .backend(LocalOptimizer::default())
        .build()
        .unwrap();
    (registry, session)
}

#[test]
fn composite_labels_repeated_components() {
    let (_, session) = two_power_laws();
    let names: Vec<_> = session.parameters().names().collect();
    assert_eq!(
        names,
        [
            "power_law.norm",
            "power_law.index",
            "power_law_2.norm",
            "power_law_2.index"
        ]
    );
}

#[test]
fn tied_parameter_follows_its_expression() {
    let (_, mut session) = two_power_laws();
    session
        .parameters_mut()
        .tie(
            "power_law_2.index",
            TieExpr::parameter("power_law.index") + 1.0,
        )
        .unwrap();
    assert_eq!(session.parameters().nfree(), 3);
    assert_eq!(
        session.parameters().get("power_law_2.index").unwrap().status(),
        ParameterStatus::Tied
    );

    let result = session.run().unwrap();
    assert_eq!(result.best_fit().len(), 3);
    assert_eq!(
        result.parameter_names(),
        ["power_law.norm", "power_law.index", "power_law_2.norm"]
    );
    let index = result.value("power_law.index").unwrap();
    let tied = result.value("power_law_2.index").unwrap();
    assert!((tied - index - 1.0).abs() < 1e-12);
    assert!((index - 1.5).abs() < 0.3, "index = {index}");

    let space = session.parameters();
    assert_eq!(space.value("power_law.index").unwrap(), index);
    assert_eq!(space.value("power_law_2.index").unwrap(), tied);
}

#[test]
fn freezing_changes_the_free_vector() {
    let (_, mut session) = two_power_laws();
    let space = session.parameters_mut();
    assert_eq!(space.to_vector().len(), 4);
    let version = space.layout_version();

    space.set_value("power_law_2.norm", 0.5).unwrap();
    space.freeze("power_law_2.norm").unwrap();
    assert_eq!(space.to_vector().len(), 3);
    assert_ne!(space.layout_version(), version);
    assert_eq!(
        space.check_layout(version),
        Err(ParameterError::StaleLayout {
            expected: space.layout_version(),
            actual: version
        })
    );

    let result = session.run().unwrap();
    assert_eq!(result.best_fit().len(), 3);
    assert_eq!(result.value("power_law_2.norm"), Some(0.5));
    assert_eq!(session.parameters().value("power_law_2.norm").unwrap(), 0.5);

    let space = session.parameters_mut();
    space.unfreeze("power_law_2.norm").unwrap();
    assert_eq!(space.to_vector().len(), 4);
}

#[test]
fn cyclic_tie_is_rejected_and_space_unchanged() {
    let (_, mut session) = two_power_laws();
    let space = session.parameters_mut();
    space
        .tie("power_law_2.index", TieExpr::parameter("power_law.index"))
        .unwrap();
    let before = space.named_values();
    let err = space
        .tie("power_law.index", TieExpr::parameter("power_law_2.index") * 2.0)
        .unwrap_err();
    assert!(matches!(err, ParameterError::CyclicTie { .. }));
    assert_eq!(space.named_values(), before);
    assert_eq!(
        space.get("power_law.index").unwrap().status(),
        ParameterStatus::Free
    );
    assert_eq!(
        space.freeze("power_law_2.index"),
        Err(ParameterError::ParameterTied("power_law_2.index".to_owned()))
    );
}

#[test]
fn explicit_space_must_match_the_model() {
    let registry = Arc::new(ModelRegistry::with_builtin_models());
    let response = diagonal_response(1.0, 5.0, 8, 1.0);
    let model = registry.model("constant").unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    let spectrum = synthetic_spectrum(&mut rng, &model, &response, &[10.0], 10.0);
    let space = ParameterSpace::from_parameters(vec![
        Parameter::new("a", 1.0).with_bounds(Bounds::non_negative()),
        Parameter::new("b", 1.0),
    ])
    .unwrap();
    let mut session = FitSession::builder(registry)
        .model_name("constant")
        .parameters(space)
        .dataset(Dataset::new(Arc::new(spectrum), response))
        .backend(LocalOptimizer::default())
        .build()
        .unwrap();
    assert_eq!(
        session.run().unwrap_err(),
        SessionError::Fit(FitError::ModelSpaceMismatch { model: 1, space: 2 })
    );
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn explicit_space_is_matched_by_name() {
    let registry = Arc::new(ModelRegistry::with_builtin_models());
    let response = diagonal_response(1.0, 5.0, 8, 1.0);
    let model = registry.model("power_law").unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    let spectrum = synthetic_spectrum(&mut rng, &model, &response, &[2.0, 1.7], 10.0);
    let space = ParameterSpace::from_parameters(vec![
        Parameter::new("power_law.index", 1.7),
        Parameter::new("power_law.norm", 2.0).with_bounds(Bounds::non_negative()),
    ])
    .unwrap();
    let mut session = FitSession::builder(registry)
        .model_name("power_law")
        .parameters(space)
        .dataset(Dataset::new(Arc::new(spectrum), response))
        .backend(LocalOptimizer::default())
        .build()
        .unwrap();
    assert_eq!(
        session.run().unwrap_err(),
        SessionError::Fit(FitError::ParameterNameMismatch {
            position: 0,
            model: "power_law.norm".to_owned(),
            space: "power_law.index".to_owned(),
        })
    );
    assert_eq!(session.state(), SessionState::Failed);
}
