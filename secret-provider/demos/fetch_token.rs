use secret_provider::{new_secret_provider, ProviderConfig, SecretProvider, Selector};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // IKS_ENABLED selects the sidecar-backed provider, IS_SATELLITE the base64 secret keys.
    let config = ProviderConfig::from_env();

    // Optional `ProviderType=<family>` or `SecretKey=<key>` argument.
    let selectors = std::env::args()
        .skip(1)
        .map(|arg| {
            let (key, value) = arg
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("expected KEY=VALUE, got {arg:?}"))?;
            Ok(Selector::parse(key, value)?)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut provider = new_secret_provider(&config, &selectors).await?;
    println!("provider: {}", provider.provider_type());

    let token = provider.get_default_iam_token(false).await?;
    println!("token lifetime: {}s", token.lifetime_secs());

    println!("riaas: {}", provider.get_riaas_endpoint().await?);
    println!("private riaas: {}", provider.get_private_riaas_endpoint().await?);
    println!("resource group: {}", provider.get_resource_group_id());
    Ok(())
}
