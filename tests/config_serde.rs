use gemcov::{
    GenerativeModelConfig, LatentModeAlgorithm, ModelKind, SubspaceDimension, setup_model,
};

#[test]
fn partial_json_config_fills_defaults() {
    let text = r#"{
        "model": "pls",
        "px": 6,
        "py": 3,
        "qx": "all",
        "qy": { "fraction": 0.5 },
        "ax": -1.0,
        "max_n_sigma_trials": 100,
        "search_order": ["random", "pc1"]
    }"#;
    let config: GenerativeModelConfig = serde_json::from_str(text).unwrap();
    assert_eq!(config.model, ModelKind::Pls);
    assert_eq!(config.qx, SubspaceDimension::All);
    assert_eq!(config.qy, SubspaceDimension::Fraction(0.5));
    assert_eq!(config.ay, 0.0);
    assert_eq!(config.r_between, GenerativeModelConfig::default().r_between);
    assert_eq!(
        config.search_order,
        vec![LatentModeAlgorithm::Random, LatentModeAlgorithm::Pc1]
    );
    assert_eq!(config.resolved_subspaces().unwrap(), (6, 2));
}

#[test]
fn config_round_trips_through_json() {
    let config = GenerativeModelConfig {
        qx: SubspaceDimension::Count(3),
        qy: SubspaceDimension::ForceOne,
        cx: Some(vec![3.0, 2.0, 1.0, 0.5]),
        ..GenerativeModelConfig::new(ModelKind::Pls, 4, 2)
    };
    let text = serde_json::to_string(&config).unwrap();
    let back: GenerativeModelConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(back, config);
}

#[test]
fn construction_serializes_with_matrices() {
    let config = GenerativeModelConfig {
        max_n_sigma_trials: 100,
        ..GenerativeModelConfig::new(ModelKind::Cca, 3, 2)
    };
    let model = setup_model(&config).unwrap();
    let value = serde_json::to_value(&model).unwrap();
    assert_eq!(value["model"], "cca");
    assert_eq!(value["px"], 3);
    assert!(value["sigma"].is_object());
    assert_eq!(value["algorithm"], model.algorithm.to_string());
}

#[test]
fn single_dimension_token_matches_command_line() {
    let config: GenerativeModelConfig =
        serde_json::from_str(r#"{ "qx": "force_1", "qy": "all" }"#).unwrap();
    assert_eq!(config.qx, SubspaceDimension::ForceOne);
    assert_eq!("force_1".parse::<SubspaceDimension>().unwrap(), config.qx);
    let text = serde_json::to_string(&config.qx).unwrap();
    assert_eq!(text, "\"force_1\"");
    assert_eq!(config.resolved_subspaces().unwrap(), (1, 5));
}
