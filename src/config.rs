use crate::auth::claims::ClaimPath;
use crate::auth::jwks::{JwksOptions, RetryPolicy};
use crate::auth::saml::{LogoutSettings, SignaturePolicy};
use crate::error::ConfigError;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(name = "portal-guard")]
#[command(about = "Cancer study portal API with pluggable authentication")]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "PORTAL_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORTAL_PORT", default_value = "8080")]
    pub port: u16,

    /// Public base URL (e.g., https://portal.example.org)
    #[arg(long, env = "PORTAL_BASE_URL")]
    pub base_url: Option<String>,

    /// JSON file with the study catalog
    #[arg(long, env = "PORTAL_STUDIES_FILE")]
    pub studies_file: Option<PathBuf>,

    /// Enable CORS for all origins
    #[arg(long, env = "PORTAL_CORS", default_value_t = false, action = ArgAction::Set)]
    pub cors: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Authentication mode: none, saml or oauth2
    #[arg(long, env = "AUTHENTICATE")]
    pub authenticate: Option<String>,

    /// Role granting access to every study
    #[arg(long, env = "PORTAL_ALL_STUDIES_ROLE", default_value = "ALL")]
    pub all_studies_role: String,

    /// Only honour roles named `<prefix>:<role>` (e.g. cbioportal)
    #[arg(long, env = "PORTAL_ROLE_PREFIX")]
    pub role_prefix: Option<String>,

    /// JSON file mapping user email/subject to roles; replaces claim-based roles
    #[arg(long, env = "PORTAL_USER_ROLES_FILE")]
    pub user_roles_file: Option<PathBuf>,

    /// Additional paths reachable without authentication
    #[arg(long = "public-path", env = "PORTAL_PUBLIC_PATHS", value_delimiter = ',')]
    pub public_paths: Vec<String>,

    /// Secret for signing session cookies (random per process if unset)
    #[arg(long, env = "PORTAL_SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// Session lifetime in seconds
    #[arg(long, env = "PORTAL_SESSION_MAX_AGE", default_value = "28800")]
    pub session_max_age_secs: u64,

    /// OAuth2 client id
    #[arg(long, env = "OAUTH2_CLIENT_ID")]
    pub oauth2_client_id: Option<String>,

    /// OAuth2 client secret
    #[arg(long, env = "OAUTH2_CLIENT_SECRET", hide_env_values = true)]
    pub oauth2_client_secret: Option<String>,

    /// Expected token issuer
    #[arg(long, env = "OAUTH2_ISSUER")]
    pub oauth2_issuer: Option<String>,

    /// Token endpoint used for offline-token exchange
    #[arg(long, env = "OAUTH2_ACCESS_TOKEN_URI")]
    pub oauth2_access_token_uri: Option<String>,

    /// Redirect URI registered with the identity provider
    #[arg(long, env = "OAUTH2_REDIRECT_URI")]
    pub oauth2_redirect_uri: Option<String>,

    /// Authorization endpoint of the identity provider
    #[arg(long, env = "OAUTH2_AUTHORIZATION_URI")]
    pub oauth2_authorization_uri: Option<String>,

    /// JWK set URL of the issuer
    #[arg(long, env = "OAUTH2_JWK_URL")]
    pub oauth2_jwk_url: Option<String>,

    /// `::`-delimited path to the roles array inside token claims
    #[arg(
        long,
        env = "OAUTH2_ROLES_PATH",
        default_value = "resource_access::cbioportal::roles"
    )]
    pub oauth2_roles_path: String,

    /// Expected audience (defaults to the client id)
    #[arg(long, env = "OAUTH2_AUDIENCE")]
    pub oauth2_audience: Option<String>,

    /// Exchange presented offline tokens for access tokens before validation
    #[arg(long, env = "OAUTH2_TOKEN_EXCHANGE", default_value_t = false, action = ArgAction::Set)]
    pub oauth2_token_exchange: bool,

    /// Grace window for token expiry, in seconds
    #[arg(long, env = "OAUTH2_LEEWAY_SECS", default_value = "0")]
    pub oauth2_leeway_secs: u64,

    /// How long fetched signing keys are trusted, in seconds
    #[arg(long, env = "OAUTH2_JWKS_CACHE_TTL_SECS", default_value = "3600")]
    pub oauth2_jwks_cache_ttl_secs: u64,

    /// Attempts per key-set fetch before rejecting the request
    #[arg(long, env = "OAUTH2_KEY_FETCH_ATTEMPTS", default_value = "3")]
    pub oauth2_key_fetch_attempts: u32,

    /// Timeout per key-set fetch attempt, in milliseconds
    #[arg(long, env = "OAUTH2_KEY_FETCH_TIMEOUT_MS", default_value = "5000")]
    pub oauth2_key_fetch_timeout_ms: u64,

    /// Initial backoff between key-set fetch attempts, in milliseconds
    #[arg(long, env = "OAUTH2_KEY_FETCH_BACKOFF_MS", default_value = "200")]
    pub oauth2_key_fetch_backoff_ms: u64,

    /// PKCS#12 keystore holding the service provider key
    #[arg(long, env = "SAML_KEYSTORE_LOCATION")]
    pub saml_keystore_location: Option<PathBuf>,

    /// Keystore password
    #[arg(long, env = "SAML_KEYSTORE_PASSWORD", hide_env_values = true)]
    pub saml_keystore_password: Option<String>,

    /// Alias (friendly name) of the key inside the keystore
    #[arg(long, env = "SAML_KEY_ALIAS")]
    pub saml_key_alias: Option<String>,

    /// IdP metadata file path or URL
    #[arg(long, env = "SAML_IDP_METADATA_LOCATION")]
    pub saml_idp_metadata_location: Option<String>,

    /// Service provider entity id
    #[arg(long, env = "SAML_ENTITY_ID")]
    pub saml_entity_id: Option<String>,

    /// Require signed assertions. `false` is only accepted by test builds.
    #[arg(long, env = "SAML_WANT_ASSERTION_SIGNED", default_value_t = true, action = ArgAction::Set)]
    pub saml_want_assertion_signed: bool,

    /// Assertion attribute holding the user's email
    #[arg(long, env = "SAML_EMAIL_ATTRIBUTE", default_value = "email")]
    pub saml_email_attribute: String,

    /// Attribute to claim mapping, `Attribute=claim`
    #[arg(long = "saml-attribute", env = "SAML_ATTRIBUTES", value_delimiter = ',')]
    pub saml_attributes: Vec<String>,

    /// Tolerated clock skew for assertion validity, in seconds
    #[arg(long, env = "SAML_CLOCK_SKEW_SECS", default_value = "30")]
    pub saml_clock_skew_secs: u64,

    /// Log out locally only, without redirecting to the IdP
    #[arg(long, env = "SAML_LOGOUT_LOCAL", default_value_t = false, action = ArgAction::Set)]
    pub saml_logout_local: bool,

    /// Where to send the browser after logout
    #[arg(long, env = "SAML_LOGOUT_URL", default_value = "/")]
    pub saml_logout_url: String,
}

impl Config {
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }
}

/// Security configuration, validated as a unit at startup.
#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pub mode: AuthenticationMode,
    pub access: AccessSettings,
}

/// The single active authentication strategy.
#[derive(Debug, Clone)]
pub enum AuthenticationMode {
    None,
    Saml(SamlSettings),
    OAuth2(OAuth2Settings),
}

/// Settings shared by the authenticated modes.
#[derive(Debug, Clone)]
pub struct AccessSettings {
    pub all_studies_role: String,
    pub role_prefix: Option<String>,
    pub user_roles_file: Option<PathBuf>,
    pub public_paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OAuth2Settings {
    pub client_id: String,
    pub issuer: String,
    pub audience: String,
    pub jwk_url: Url,
    pub roles_path: ClaimPath,
    pub leeway_secs: u64,
    pub jwks: JwksOptions,
    pub authorization_uri: Option<Url>,
    pub redirect_uri: Option<Url>,
    pub exchange: Option<TokenExchangeSettings>,
}

#[derive(Clone)]
pub struct TokenExchangeSettings {
    pub token_uri: Url,
    pub client_secret: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for TokenExchangeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeSettings")
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct KeystoreSettings {
    pub location: PathBuf,
    pub password: String,
    pub key_alias: String,
}

impl std::fmt::Debug for KeystoreSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystoreSettings")
            .field("location", &self.location)
            .field("key_alias", &self.key_alias)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SamlSettings {
    pub keystore: KeystoreSettings,
    pub idp_metadata_location: String,
    pub entity_id: String,
    pub acs_url: String,
    pub signature: SignaturePolicy,
    pub email_attribute: String,
    pub attribute_claims: Vec<(String, String)>,
    pub clock_skew_secs: u64,
    pub logout: LogoutSettings,
    pub session_secret: Option<Vec<u8>>,
    pub session_max_age_secs: u64,
}

fn required(value: &Option<String>, option: &'static str) -> Result<String, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::Missing(option))
}

fn parse_url(value: &str, option: &'static str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::invalid(option, e.to_string()))
}

fn optional_url(value: &Option<String>, option: &'static str) -> Result<Option<Url>, ConfigError> {
    value.as_deref().map(|v| parse_url(v, option)).transpose()
}

impl SecuritySettings {
    /// Select and validate the authentication mode.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let name = required(&config.authenticate, "authenticate")?;
        let mode = match name.to_ascii_lowercase().as_str() {
            "none" => AuthenticationMode::None,
            "oauth2" => AuthenticationMode::OAuth2(OAuth2Settings::from_config(config)?),
            "saml" => AuthenticationMode::Saml(SamlSettings::from_config(config)?),
            other => {
                return Err(ConfigError::invalid(
                    "authenticate",
                    format!("`{}` is not one of none, saml, oauth2", other),
                ));
            }
        };

        warn_ignored_blocks(config, &mode);

        let mut public_paths = vec!["/api/info".to_string()];
        public_paths.extend(config.public_paths.iter().cloned());

        Ok(Self {
            mode,
            access: AccessSettings {
                all_studies_role: config.all_studies_role.clone(),
                role_prefix: config.role_prefix.clone().filter(|p| !p.is_empty()),
                user_roles_file: config.user_roles_file.clone(),
                public_paths,
            },
        })
    }
}

fn warn_ignored_blocks(config: &Config, mode: &AuthenticationMode) {
    let oauth2_set = config.oauth2_client_id.is_some()
        || config.oauth2_issuer.is_some()
        || config.oauth2_jwk_url.is_some();
    let saml_set = config.saml_keystore_location.is_some()
        || config.saml_idp_metadata_location.is_some()
        || config.saml_entity_id.is_some();

    if oauth2_set && !matches!(mode, AuthenticationMode::OAuth2(_)) {
        tracing::warn!("OAuth2 settings present but ignored: authentication mode is not oauth2");
    }
    if saml_set && !matches!(mode, AuthenticationMode::Saml(_)) {
        tracing::warn!("SAML settings present but ignored: authentication mode is not saml");
    }
}

impl OAuth2Settings {
    fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let client_id = required(&config.oauth2_client_id, "oauth2-client-id")?;
        let issuer = required(&config.oauth2_issuer, "oauth2-issuer")?;
        let jwk_url = parse_url(
            &required(&config.oauth2_jwk_url, "oauth2-jwk-url")?,
            "oauth2-jwk-url",
        )?;
        let roles_path = ClaimPath::parse(&config.oauth2_roles_path)?;
        let audience = config
            .oauth2_audience
            .clone()
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| client_id.clone());

        if config.oauth2_key_fetch_attempts == 0 {
            return Err(ConfigError::invalid(
                "oauth2-key-fetch-attempts",
                "must be at least 1",
            ));
        }
        let fetch_timeout = Duration::from_millis(config.oauth2_key_fetch_timeout_ms);

        let exchange = if config.oauth2_token_exchange {
            Some(TokenExchangeSettings {
                token_uri: parse_url(
                    &required(&config.oauth2_access_token_uri, "oauth2-access-token-uri")?,
                    "oauth2-access-token-uri",
                )?,
                client_secret: required(&config.oauth2_client_secret, "oauth2-client-secret")?,
                timeout: fetch_timeout,
            })
        } else {
            None
        };

        Ok(Self {
            client_id,
            issuer,
            audience,
            jwk_url,
            roles_path,
            leeway_secs: config.oauth2_leeway_secs,
            jwks: JwksOptions {
                cache_ttl: Duration::from_secs(config.oauth2_jwks_cache_ttl_secs),
                fetch_timeout,
                retry: RetryPolicy {
                    attempts: config.oauth2_key_fetch_attempts,
                    initial_backoff: Duration::from_millis(config.oauth2_key_fetch_backoff_ms),
                    ..RetryPolicy::default()
                },
                ..JwksOptions::default()
            },
            authorization_uri: optional_url(
                &config.oauth2_authorization_uri,
                "oauth2-authorization-uri",
            )?,
            redirect_uri: optional_url(&config.oauth2_redirect_uri, "oauth2-redirect-uri")?,
            exchange,
        })
    }
}

impl SamlSettings {
    fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let location = config
            .saml_keystore_location
            .clone()
            .ok_or(ConfigError::Missing("saml-keystore-location"))?;
        let keystore = KeystoreSettings {
            location,
            password: required(&config.saml_keystore_password, "saml-keystore-password")?,
            key_alias: required(&config.saml_key_alias, "saml-key-alias")?,
        };

        let attribute_claims = config
            .saml_attributes
            .iter()
            .map(|pair| match pair.split_once('=') {
                Some((attribute, claim)) if !attribute.is_empty() && !claim.is_empty() => {
                    Ok((attribute.trim().to_string(), claim.trim().to_string()))
                }
                _ => Err(ConfigError::invalid(
                    "saml-attribute",
                    format!("`{}` is not `Attribute=claim`", pair),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            keystore,
            idp_metadata_location: required(
                &config.saml_idp_metadata_location,
                "saml-idp-metadata-location",
            )?,
            entity_id: required(&config.saml_entity_id, "saml-entity-id")?,
            acs_url: format!(
                "{}/saml/acs",
                config.effective_base_url().trim_end_matches('/')
            ),
            signature: signature_policy(config.saml_want_assertion_signed)?,
            email_attribute: config.saml_email_attribute.clone(),
            attribute_claims,
            clock_skew_secs: config.saml_clock_skew_secs,
            logout: LogoutSettings {
                local: config.saml_logout_local,
                url: config.saml_logout_url.clone(),
            },
            session_secret: config
                .session_secret
                .as_ref()
                .map(|s| s.as_bytes().to_vec()),
            session_max_age_secs: config.session_max_age_secs,
        })
    }
}

#[cfg(any(test, feature = "insecure-saml"))]
fn signature_policy(want_signed: bool) -> Result<SignaturePolicy, ConfigError> {
    if want_signed {
        Ok(SignaturePolicy::Required)
    } else {
        tracing::warn!("SAML assertion signatures are NOT verified; test builds only");
        Ok(SignaturePolicy::Unverified)
    }
}

#[cfg(not(any(test, feature = "insecure-saml")))]
fn signature_policy(want_signed: bool) -> Result<SignaturePolicy, ConfigError> {
    if want_signed {
        Ok(SignaturePolicy::Required)
    } else {
        Err(ConfigError::invalid(
            "saml-want-assertion-signed",
            "unsigned assertions are only accepted by builds with the `insecure-saml` feature",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["portal-guard"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    const OAUTH2: &[&str] = &[
        "--authenticate",
        "oauth2",
        "--oauth2-client-id",
        "cbioportal",
        "--oauth2-issuer",
        "http://idp/realms/cbio",
        "--oauth2-jwk-url",
        "http://idp/realms/cbio/certs",
    ];

    const SAML: &[&str] = &[
        "--authenticate",
        "saml",
        "--saml-keystore-location",
        "/etc/portal/sp.p12",
        "--saml-keystore-password",
        "123456",
        "--saml-key-alias",
        "secure-key",
        "--saml-idp-metadata-location",
        "/etc/portal/idp.xml",
        "--saml-entity-id",
        "cbioportal",
    ];

    #[test]
    fn test_effective_base_url_default() {
        let config = parse(&["--host", "localhost", "--port", "3000"]);
        assert_eq!(config.effective_base_url(), "http://localhost:3000");
    }

    #[test]
    fn test_effective_base_url_custom() {
        let config = parse(&["--base-url", "https://portal.example.org"]);
        assert_eq!(config.effective_base_url(), "https://portal.example.org");
    }

    #[test]
    fn test_missing_mode_is_fatal() {
        let config = Config {
            authenticate: None,
            ..parse(&[])
        };
        assert!(matches!(
            SecuritySettings::from_config(&config),
            Err(ConfigError::Missing("authenticate"))
        ));
    }

    #[test]
    fn test_unknown_mode_is_fatal() {
        let config = parse(&["--authenticate", "ldap"]);
        assert!(matches!(
            SecuritySettings::from_config(&config),
            Err(ConfigError::Invalid {
                option: "authenticate",
                ..
            })
        ));
    }

    #[test]
    fn test_none_mode() {
        let settings = SecuritySettings::from_config(&parse(&["--authenticate", "none"])).unwrap();
        assert!(matches!(settings.mode, AuthenticationMode::None));
        assert_eq!(settings.access.public_paths, vec!["/api/info"]);
    }

    #[test]
    fn test_oauth2_mode() {
        let settings = SecuritySettings::from_config(&parse(OAUTH2)).unwrap();
        let AuthenticationMode::OAuth2(oauth2) = settings.mode else {
            panic!("expected oauth2 mode");
        };
        assert_eq!(oauth2.audience, "cbioportal");
        assert_eq!(
            oauth2.roles_path,
            ClaimPath::parse("resource_access::cbioportal::roles").unwrap()
        );
        assert_eq!(oauth2.leeway_secs, 0);
        assert!(oauth2.exchange.is_none());
    }

    #[test]
    fn test_oauth2_requires_issuer() {
        let config = Config {
            oauth2_issuer: None,
            ..parse(OAUTH2)
        };
        assert!(matches!(
            SecuritySettings::from_config(&config),
            Err(ConfigError::Missing("oauth2-issuer"))
        ));
    }

    #[test]
    fn test_token_exchange_requires_token_uri_and_secret() {
        let mut args = OAUTH2.to_vec();
        args.extend(["--oauth2-token-exchange", "true"]);
        assert!(matches!(
            SecuritySettings::from_config(&parse(&args)),
            Err(ConfigError::Missing("oauth2-access-token-uri"))
        ));

        args.extend(["--oauth2-access-token-uri", "http://idp/token"]);
        assert!(matches!(
            SecuritySettings::from_config(&parse(&args)),
            Err(ConfigError::Missing("oauth2-client-secret"))
        ));

        args.extend(["--oauth2-client-secret", "s3cret"]);
        let settings = SecuritySettings::from_config(&parse(&args)).unwrap();
        let AuthenticationMode::OAuth2(oauth2) = settings.mode else {
            panic!("expected oauth2 mode");
        };
        assert!(oauth2.exchange.is_some());
    }

    #[test]
    fn test_invalid_jwk_url() {
        let config = Config {
            oauth2_jwk_url: Some("not a url".to_string()),
            ..parse(OAUTH2)
        };
        assert!(SecuritySettings::from_config(&config).is_err());
    }

    #[test]
    fn test_saml_mode() {
        let mut args = SAML.to_vec();
        args.extend(["--saml-attribute", "User.role=roles", "--base-url", "https://portal/"]);
        let settings = SecuritySettings::from_config(&parse(&args)).unwrap();
        let AuthenticationMode::Saml(saml) = settings.mode else {
            panic!("expected saml mode");
        };
        assert_eq!(saml.acs_url, "https://portal/saml/acs");
        assert_eq!(saml.signature, SignaturePolicy::Required);
        assert_eq!(
            saml.attribute_claims,
            vec![("User.role".to_string(), "roles".to_string())]
        );
    }

    #[test]
    fn test_saml_requires_keystore_alias() {
        let config = Config {
            saml_key_alias: None,
            ..parse(SAML)
        };
        assert!(matches!(
            SecuritySettings::from_config(&config),
            Err(ConfigError::Missing("saml-key-alias"))
        ));
    }

    #[test]
    fn test_saml_bad_attribute_mapping() {
        let mut args = SAML.to_vec();
        args.extend(["--saml-attribute", "no-equals-sign"]);
        assert!(SecuritySettings::from_config(&parse(&args)).is_err());
    }

    #[test]
    fn test_oauth2_settings_ignored_in_saml_mode() {
        let mut args = SAML.to_vec();
        args.extend(["--oauth2-client-id", "cbioportal"]);
        let settings = SecuritySettings::from_config(&parse(&args)).unwrap();
        assert!(matches!(settings.mode, AuthenticationMode::Saml(_)));
    }
}
