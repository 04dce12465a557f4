//! TemporalCluster admission rules
//!
//! Every rule runs and every violation is collected, so a rejected apply
//! lists all problems at once. [`validate_spec`] is the subset that needs no
//! previous object and no API access; the reconcile engine runs it at the
//! start of each pass.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use temporal_common::crd::{
    DatastoreType, MtlsSpec, TemporalCluster, TemporalClusterSpec, MIN_RENEW_BEFORE, TASK_TYPES,
};
use temporal_common::duration::parse_duration;
use temporal_common::version::{
    check_supported, check_upgrade, INTERNAL_FRONTEND_MIN_VERSION,
    SECONDARY_VISIBILITY_MIN_VERSION,
};
use temporal_common::{Error, PlatformFeatures, Version};

/// One violation, keyed by the offending field path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Field path (`spec.persistence.defaultStore.sql.connectAddr`)
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Violations in the order the rules found them
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    /// Record a violation
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of violations
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Violations in order
    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// Whether a violation was recorded for `field`
    pub fn contains_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// Result of running the admission rules
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Non-fatal notes returned to the client
    pub warnings: Vec<String>,
    /// Violations; any makes the request denied
    pub errors: FieldErrors,
}

impl ValidationOutcome {
    /// Whether the request is admitted
    pub fn is_allowed(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into the operator error type
    ///
    /// The error points at the first offending field and carries every
    /// violation in its message. Warnings are returned on success.
    pub fn into_result(self, cluster: &str) -> Result<Vec<String>, Error> {
        match self.errors.iter().next() {
            None => Ok(self.warnings),
            Some(first) => Err(Error::validation_for_field(
                cluster,
                first.field.clone(),
                self.errors.to_string(),
            )),
        }
    }
}

/// Rules for a new cluster
pub async fn validate_create(
    cluster: &TemporalCluster,
    features: &PlatformFeatures,
) -> ValidationOutcome {
    let mut outcome = validate_spec(cluster);
    validate_platform(&cluster.spec, features, &mut outcome.errors).await;
    outcome
}

/// Rules for a spec change
///
/// Adds shard immutability and the sequential upgrade rule on top of the
/// create rules. The upgrade is checked from the applied `status.version`,
/// falling back to the old spec's version before the first rollout.
pub async fn validate_update(
    old: &TemporalCluster,
    new: &TemporalCluster,
    features: &PlatformFeatures,
) -> ValidationOutcome {
    let mut outcome = validate_create(new, features).await;
    let errors = &mut outcome.errors;

    if old.spec.num_history_shards != new.spec.num_history_shards {
        errors.push(
            "spec.numHistoryShards",
            format!(
                "field is immutable: cannot change from {} to {}",
                old.spec.num_history_shards, new.spec.num_history_shards
            ),
        );
    }

    // An unsupported candidate is already reported by the create rules
    let current = old.applied_version().or_else(|| old.version().ok());
    let candidate = new.version().ok().filter(|v| check_supported(v).is_ok());
    if let (Some(current), Some(candidate)) = (current, candidate) {
        if let Err(e) = check_upgrade(&current, &candidate) {
            errors.push("spec.version", e.to_string());
        }
    }

    outcome
}

/// Rules for a delete: always admitted
pub fn validate_delete() -> ValidationOutcome {
    ValidationOutcome::default()
}

/// Rules that need only the spec itself
pub fn validate_spec(cluster: &TemporalCluster) -> ValidationOutcome {
    let spec = &cluster.spec;
    let mut outcome = ValidationOutcome::default();

    if spec.num_history_shards < 1 {
        outcome
            .errors
            .push("spec.numHistoryShards", "must be at least 1");
    } else if !(spec.num_history_shards as u32).is_power_of_two() {
        outcome.warnings.push(format!(
            "spec.numHistoryShards {} is not a power of two",
            spec.num_history_shards
        ));
    }

    match Version::parse(&spec.version) {
        Ok(version) => {
            if let Err(e) = check_supported(&version) {
                outcome.errors.push("spec.version", e.to_string());
            }
            validate_version_gates(spec, &version, &mut outcome.errors);
        }
        Err(e) => outcome.errors.push("spec.version", e.to_string()),
    }

    validate_datastores(spec, &mut outcome.errors);
    validate_dynamic_config(spec, &mut outcome.errors);
    if let Some(mtls) = &spec.mtls {
        validate_mtls(mtls, &mut outcome);
    }

    outcome
}

/// Features that only exist from some server version on
fn validate_version_gates(
    spec: &TemporalClusterSpec,
    version: &Version,
    errors: &mut FieldErrors,
) {
    if spec.persistence.secondary_visibility_store.is_some()
        && !version.supports(&SECONDARY_VISIBILITY_MIN_VERSION)
    {
        errors.push(
            "spec.persistence.secondaryVisibilityStore",
            format!(
                "secondary visibility requires version >= {}, got {version}",
                SECONDARY_VISIBILITY_MIN_VERSION
            ),
        );
    }

    let internal_frontend = spec
        .services
        .as_ref()
        .and_then(|s| s.internal_frontend.as_ref())
        .is_some_and(|s| s.enabled == Some(true));
    if internal_frontend && !version.supports(&INTERNAL_FRONTEND_MIN_VERSION) {
        errors.push(
            "spec.services.internalFrontend",
            format!(
                "internal frontend requires version >= {}, got {version}",
                INTERNAL_FRONTEND_MIN_VERSION
            ),
        );
    }
}

fn validate_datastores(spec: &TemporalClusterSpec, errors: &mut FieldErrors) {
    let mut seen = BTreeSet::new();
    let mut env_vars = BTreeMap::new();
    for (role, store) in spec.persistence.stores() {
        let field = role.field();
        if store.name.is_empty() {
            errors.push(format!("{field}.name"), "must not be empty");
        } else if !seen.insert(store.name.as_str()) {
            errors.push(
                format!("{field}.name"),
                format!("duplicate datastore name '{}'", store.name),
            );
        } else {
            let env_var = store.password_env_var();
            if let Some(other) = env_vars.insert(env_var.clone(), store.name.as_str()) {
                errors.push(
                    format!("{field}.name"),
                    format!(
                        "datastore name '{}' maps to password variable {env_var} like '{other}'",
                        store.name
                    ),
                );
            }
        }

        match store.datastore_type() {
            DatastoreType::Unknown => errors.push(
                field,
                "exactly one of sql, cassandra or elasticsearch must be set",
            ),
            DatastoreType::Sql => {
                let has_port = store.sql.as_ref().is_some_and(|sql| sql.host_port().is_some());
                if !has_port {
                    errors.push(format!("{field}.sql.connectAddr"), "must be host:port");
                }
            }
            DatastoreType::Cassandra | DatastoreType::Elasticsearch => {}
        }
    }
}

fn validate_dynamic_config(spec: &TemporalClusterSpec, errors: &mut FieldErrors) {
    let Some(dynamic) = &spec.dynamic_config else {
        return;
    };
    if let Err(e) = parse_duration(dynamic.poll_interval()) {
        errors.push("spec.dynamicConfig.pollInterval", e.to_string());
    }
    for (key, values) in &dynamic.values {
        for (i, value) in values.iter().enumerate() {
            let task_type = value
                .constraints
                .as_ref()
                .and_then(|c| c.task_type.as_deref());
            if let Some(task_type) = task_type {
                if !TASK_TYPES.contains(&task_type) {
                    errors.push(
                        format!("spec.dynamicConfig.values.{key}[{i}].constraints.taskType"),
                        format!(
                            "unsupported value '{task_type}', must be one of: {}",
                            TASK_TYPES.join(", ")
                        ),
                    );
                }
            }
        }
    }
}

fn validate_mtls(mtls: &MtlsSpec, outcome: &mut ValidationOutcome) {
    if let Some(renew_before) = &mtls.renew_before {
        match parse_duration(renew_before) {
            Ok(d) if parse_duration(MIN_RENEW_BEFORE).is_ok_and(|min| d < min) => {
                outcome.errors.push(
                    "spec.mTLS.renewBefore",
                    format!("must be at least {MIN_RENEW_BEFORE}, got {renew_before}"),
                )
            }
            Ok(_) => {}
            Err(e) => outcome.errors.push("spec.mTLS.renewBefore", e.to_string()),
        }
    }
    if let Some(refresh) = &mtls.refresh_interval {
        if let Err(e) = parse_duration(refresh) {
            outcome.errors.push("spec.mTLS.refreshInterval", e.to_string());
        }
    }
    if let Some(durations) = &mtls.certificates_duration {
        let fields = [
            ("rootCaCertificate", &durations.root_ca_certificate),
            ("intermediateCasCertificates", &durations.intermediate_cas_certificates),
            ("clientCertificates", &durations.client_certificates),
            ("frontendCertificate", &durations.frontend_certificate),
            ("internodeCertificate", &durations.internode_certificate),
        ];
        for (name, value) in fields {
            if let Some(Err(e)) = value.as_deref().map(parse_duration) {
                outcome
                    .errors
                    .push(format!("spec.mTLS.certificatesDuration.{name}"), e.to_string());
            }
        }
    }
    if !mtls.internode_enabled() && !mtls.frontend_enabled() {
        outcome
            .warnings
            .push("spec.mTLS is set but neither internode nor frontend is enabled".to_string());
    }
}

/// The mTLS provider's API must be installed in the cluster
async fn validate_platform(
    spec: &TemporalClusterSpec,
    features: &PlatformFeatures,
    errors: &mut FieldErrors,
) {
    let Some(mtls) = &spec.mtls else {
        return;
    };
    if !mtls.internode_enabled() && !mtls.frontend_enabled() {
        return;
    }
    let feature = mtls.provider.required_feature();
    if !features.resolve(feature).await {
        errors.push(
            "spec.mTLS.provider",
            format!(
                "provider {} requires {} to be installed in the cluster",
                mtls.provider,
                feature.display_name()
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use rstest::rstest;
    use temporal_common::crd::{
        CassandraSpec, ConstrainedValue, Constraints, DatastoreSpec, DomainSpec,
        DynamicConfigSpec, MtlsProvider, PersistenceSpec, ServiceSpec, ServicesSpec, SqlSpec,
        TemporalClusterStatus,
    };
    use temporal_common::PlatformFeature;

    fn sql_store(name: &str, addr: &str) -> DatastoreSpec {
        DatastoreSpec {
            name: name.to_string(),
            sql: Some(SqlSpec {
                plugin_name: "postgres12".to_string(),
                connect_addr: addr.to_string(),
                database_name: name.to_string(),
                user: "temporal".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn spec(version: &str) -> TemporalClusterSpec {
        TemporalClusterSpec {
            version: version.to_string(),
            num_history_shards: 512,
            persistence: PersistenceSpec {
                default_store: sql_store("default", "postgres:5432"),
                visibility_store: Some(sql_store("visibility", "postgres:5432")),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn cluster(spec: TemporalClusterSpec) -> TemporalCluster {
        let mut cluster = TemporalCluster::new("prod", spec);
        cluster.metadata = ObjectMeta {
            name: Some("prod".to_string()),
            namespace: Some("temporal".to_string()),
            ..Default::default()
        };
        cluster
    }

    fn with_status(mut cluster: TemporalCluster, version: &str) -> TemporalCluster {
        cluster.status = Some(TemporalClusterStatus {
            version: Some(version.to_string()),
            ..Default::default()
        });
        cluster
    }

    fn cert_manager_mtls() -> MtlsSpec {
        MtlsSpec {
            provider: MtlsProvider::CertManager,
            internode: Some(DomainSpec { enabled: true }),
            frontend: Some(DomainSpec { enabled: true }),
            ..Default::default()
        }
    }

    fn all_features() -> std::sync::Arc<PlatformFeatures> {
        PlatformFeatures::with(&PlatformFeature::ALL)
    }

    #[test]
    fn valid_spec_is_admitted() {
        let outcome = validate_spec(&cluster(spec("1.18.4")));
        assert!(outcome.is_allowed(), "{}", outcome.errors);
        assert!(outcome.warnings.is_empty());
    }

    #[rstest]
    #[case("latest", "invalid version")]
    #[case("1.13.9", "not supported")]
    #[case("1.26.0", "not supported")]
    #[case("1.20.0", "use 1.20.1")]
    #[case("1.21.0", "use 1.21.1")]
    fn version_must_be_supported_and_not_broken(#[case] version: &str, #[case] message: &str) {
        let outcome = validate_spec(&cluster(spec(version)));
        let error = outcome.errors.iter().next().unwrap();
        assert_eq!(error.field, "spec.version");
        assert!(error.message.contains(message), "{}", error.message);
    }

    #[rstest]
    #[case("1.20.1", false)]
    #[case("1.21.1", true)]
    fn secondary_visibility_is_version_gated(#[case] version: &str, #[case] allowed: bool) {
        let mut s = spec(version);
        s.persistence.secondary_visibility_store = Some(sql_store("visibility2", "mysql:3306"));
        let outcome = validate_spec(&cluster(s));
        assert_eq!(outcome.is_allowed(), allowed, "{}", outcome.errors);
        if !allowed {
            assert!(outcome
                .errors
                .contains_field("spec.persistence.secondaryVisibilityStore"));
        }
    }

    #[rstest]
    #[case("1.19.1", false)]
    #[case("1.20.1", true)]
    fn internal_frontend_is_version_gated(#[case] version: &str, #[case] allowed: bool) {
        let mut s = spec(version);
        s.services = Some(ServicesSpec {
            internal_frontend: Some(ServiceSpec {
                enabled: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        });
        let outcome = validate_spec(&cluster(s));
        assert_eq!(
            outcome.errors.contains_field("spec.services.internalFrontend"),
            !allowed
        );
    }

    #[test]
    fn datastore_problems_are_all_reported() {
        let mut s = spec("1.18.4");
        s.persistence.visibility_store = Some(sql_store("default", "postgres"));
        s.persistence.advanced_visibility_store = Some(DatastoreSpec {
            name: "es".to_string(),
            sql: Some(SqlSpec::default()),
            cassandra: Some(CassandraSpec::default()),
            ..Default::default()
        });

        let outcome = validate_spec(&cluster(s));
        let fields: Vec<_> = outcome.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "spec.persistence.visibilityStore.name",
                "spec.persistence.visibilityStore.sql.connectAddr",
                "spec.persistence.advancedVisibilityStore",
            ]
        );
    }

    #[rstest]
    #[case("default", "Default")]
    #[case("my-db", "my_db")]
    #[case("pg.main", "pg--main")]
    fn store_names_sharing_a_password_variable_are_rejected(
        #[case] first: &str,
        #[case] second: &str,
    ) {
        let mut s = spec("1.18.4");
        s.persistence.default_store = sql_store(first, "postgres:5432");
        s.persistence.visibility_store = Some(sql_store(second, "postgres:5432"));

        let outcome = validate_spec(&cluster(s));
        let error = outcome.errors.iter().next().unwrap();
        assert_eq!(error.field, "spec.persistence.visibilityStore.name");
        assert!(error.message.contains("DATASTORE_PASSWORD"), "{}", error.message);
        assert!(error.message.contains(first), "{}", error.message);
    }

    #[test]
    fn task_type_constraint_lists_legal_values() {
        let mut s = spec("1.18.4");
        s.dynamic_config = Some(DynamicConfigSpec {
            values: BTreeMap::from([(
                "matching.numTaskqueueReadPartitions".to_string(),
                vec![ConstrainedValue {
                    value: serde_json::json!(4),
                    constraints: Some(Constraints {
                        task_type: Some("Nexus".to_string()),
                        ..Default::default()
                    }),
                }],
            )]),
            ..Default::default()
        });
        let outcome = validate_spec(&cluster(s));
        let error = outcome.errors.iter().next().unwrap();
        assert_eq!(
            error.field,
            "spec.dynamicConfig.values.matching.numTaskqueueReadPartitions[0].constraints.taskType"
        );
        assert!(error.message.contains("Workflow, Activity"));
    }

    #[rstest]
    #[case(Some("4m"), None, Some("spec.mTLS.renewBefore"))]
    #[case(Some("5m"), None, None)]
    #[case(Some("soon"), None, Some("spec.mTLS.renewBefore"))]
    #[case(None, Some("1x"), Some("spec.mTLS.refreshInterval"))]
    #[case(None, Some("30m"), None)]
    fn mtls_durations(
        #[case] renew_before: Option<&str>,
        #[case] refresh: Option<&str>,
        #[case] rejected: Option<&str>,
    ) {
        let mut s = spec("1.18.4");
        s.mtls = Some(MtlsSpec {
            renew_before: renew_before.map(str::to_string),
            refresh_interval: refresh.map(str::to_string),
            ..cert_manager_mtls()
        });
        let outcome = validate_spec(&cluster(s));
        match rejected {
            Some(field) => assert!(outcome.errors.contains_field(field), "{}", outcome.errors),
            None => assert!(outcome.is_allowed(), "{}", outcome.errors),
        }
    }

    #[test]
    fn uneven_shard_count_warns() {
        let mut s = spec("1.18.4");
        s.num_history_shards = 500;
        let outcome = validate_spec(&cluster(s));
        assert!(outcome.is_allowed());
        assert_eq!(outcome.warnings.len(), 1);
    }

    /// Story: cert-manager mTLS requested on a cluster without cert-manager
    #[tokio::test]
    async fn story_cert_manager_without_the_api_is_rejected() {
        let mut s = spec("1.18.4");
        s.mtls = Some(cert_manager_mtls());
        let tc = cluster(s);

        let without = PlatformFeatures::with(&[PlatformFeature::Istio]);
        let outcome = validate_create(&tc, &without).await;
        assert!(!outcome.is_allowed());
        let error = outcome.errors.iter().next().unwrap();
        assert_eq!(error.field, "spec.mTLS.provider");
        assert!(error.message.contains("cert-manager"));

        assert!(validate_create(&tc, &all_features()).await.is_allowed());
    }

    #[rstest]
    #[case(MtlsProvider::Linkerd, PlatformFeature::Linkerd)]
    #[case(MtlsProvider::Istio, PlatformFeature::Istio)]
    #[tokio::test]
    async fn mesh_providers_need_their_mesh(
        #[case] provider: MtlsProvider,
        #[case] feature: PlatformFeature,
    ) {
        let mut s = spec("1.18.4");
        s.mtls = Some(MtlsSpec {
            provider,
            ..cert_manager_mtls()
        });
        let tc = cluster(s);
        assert!(!validate_create(&tc, &PlatformFeatures::with(&[])).await.is_allowed());
        assert!(validate_create(&tc, &PlatformFeatures::with(&[feature])).await.is_allowed());
    }

    #[tokio::test]
    async fn shard_count_is_immutable() {
        let old = cluster(spec("1.18.4"));
        let mut s = spec("1.18.4");
        s.num_history_shards = 1024;
        let outcome = validate_update(&old, &cluster(s), &all_features()).await;
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors.contains_field("spec.numHistoryShards"));
    }

    #[rstest]
    #[case(Some("1.18.4"), "1.19.2", true)]
    #[case(Some("1.18.4"), "1.18.5", true)]
    #[case(Some("1.18.4"), "1.20.1", false)]
    #[case(Some("1.19.1"), "1.18.4", false)]
    #[case(None, "1.19.2", true)]
    #[case(None, "1.22.0", false)]
    #[tokio::test]
    async fn upgrades_move_one_minor_at_a_time(
        #[case] applied: Option<&str>,
        #[case] target: &str,
        #[case] allowed: bool,
    ) {
        let old = match applied {
            Some(v) => with_status(cluster(spec(v)), v),
            None => cluster(spec("1.18.4")),
        };
        let outcome = validate_update(&old, &cluster(spec(target)), &all_features()).await;
        assert_eq!(
            outcome.errors.contains_field("spec.version"),
            !allowed,
            "{}",
            outcome.errors
        );
    }

    #[tokio::test]
    async fn unsupported_target_is_reported_once() {
        let old = with_status(cluster(spec("1.18.4")), "1.18.4");
        let huge = format!("1.{}.0", u64::MAX);
        let outcome = validate_update(&old, &cluster(spec(&huge)), &all_features()).await;
        let messages: Vec<_> = outcome
            .errors
            .iter()
            .filter(|e| e.field == "spec.version")
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(messages.len(), 1, "{messages:?}");
        assert!(messages[0].contains("not supported"), "{}", messages[0]);
    }

    #[tokio::test]
    async fn upgrade_from_an_out_of_range_applied_version_does_not_panic() {
        let applied = format!("1.{}.0", u64::MAX);
        let old = with_status(cluster(spec("1.18.4")), &applied);
        let outcome = validate_update(&old, &cluster(spec("1.18.5")), &all_features()).await;
        assert!(outcome.errors.contains_field("spec.version"));
    }

    /// Story: a user jumps two minors while the previous rollout is still running
    ///
    /// The old spec already says 1.19.2 but the cluster still runs 1.18.4,
    /// so 1.20.1 is measured against what is actually applied.
    #[tokio::test]
    async fn story_upgrade_is_measured_from_the_applied_version() {
        let old = with_status(cluster(spec("1.19.2")), "1.18.4");
        let outcome = validate_update(&old, &cluster(spec("1.20.1")), &all_features()).await;
        let error = outcome.errors.iter().next().unwrap();
        assert_eq!(error.field, "spec.version");
        assert!(error.message.contains("sequential"));
    }

    #[test]
    fn delete_is_always_admitted() {
        assert!(validate_delete().is_allowed());
    }

    #[test]
    fn into_result_points_at_the_first_field_and_keeps_every_message() {
        let mut s = spec("1.20.0");
        s.num_history_shards = 0;
        let err = validate_spec(&cluster(s)).into_result("prod").unwrap_err();
        assert_eq!(err.field(), Some("spec.numHistoryShards"));
        let message = err.to_string();
        assert!(message.contains("prod"));
        assert!(message.contains("spec.numHistoryShards: must be at least 1"));
        assert!(message.contains("use 1.20.1"));
        assert!(!err.is_retryable());
    }
}
