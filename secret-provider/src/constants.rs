//! Well-known names: cluster objects, their data keys, environment markers and defaults.

use std::time::Duration;

/// Primary credential secret.
pub const IBMCLOUD_CREDENTIALS_SECRET: &str = "ibm-cloud-credentials";

/// Key of the env-style credential document inside [`IBMCLOUD_CREDENTIALS_SECRET`].
pub const CLOUD_PROVIDER_ENV: &str = "ibm-credentials.env";

/// Legacy credential and configuration secret, also the fallback watch target.
pub const STORAGE_SECRET_STORE_SECRET: &str = "storage-secret-store";

/// Key of the TOML document inside [`STORAGE_SECRET_STORE_SECRET`].
pub const SECRET_STORE_FILE: &str = "slclient.toml";

/// Config map holding the modern cloud configuration.
pub const CLOUD_CONF_CONFIGMAP: &str = "cloud-conf";

/// Key of the JSON document inside [`CLOUD_CONF_CONFIGMAP`].
pub const CLOUD_CONF_FILE: &str = "cloud-conf.json";

/// Config map describing the cluster identity.
pub const CLUSTER_INFO_CONFIGMAP: &str = "cluster-info";

/// Key of the JSON document inside [`CLUSTER_INFO_CONFIGMAP`].
pub const CLUSTER_CONFIG_FILE: &str = "cluster-config.json";

/// Environment flag selecting managed (sidecar) mode when set to `true`.
pub const MANAGED_MODE_ENV: &str = "IKS_ENABLED";

/// Environment marker for disconnected (satellite) deployments.
pub const SATELLITE_ENV: &str = "IS_SATELLITE";

/// Default unix socket of the secret sidecar.
pub const DEFAULT_SIDECAR_ENDPOINT: &str = "/csi/provider.sock";

/// Namespace of the running pod, mounted by the kubelet.
pub const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Projected service account token used for compute-identity exchange.
pub const DEFAULT_SERVICE_ACCOUNT_TOKEN_FILE: &str = "/var/run/secrets/tokens/sa-token";

/// Public IAM endpoint used when no exchange URL is configured.
pub const DEFAULT_TOKEN_EXCHANGE_URL: &str = "https://iam.cloud.ibm.com";

/// Path of the IAM token endpoint relative to the exchange URL.
pub const TOKEN_EXCHANGE_PATH: &str = "/identity/token";

/// Bound on the sidecar dial performed while constructing a managed provider.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on a single sidecar round-trip, dial included.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Bound on a reachability probe or a token exchange request.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A cached token is considered expired this long before its real expiry.
pub const DEFAULT_TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Provider type tag for sidecar-backed providers.
pub const MANAGED_PROVIDER_TYPE: &str = "managed-secret-provider";

/// Provider type tag for in-process providers.
pub const UNMANAGED_PROVIDER_TYPE: &str = "unmanaged-secret-provider";
