/// Configuration macros for zero-repetition config definitions
///
/// `config_struct!` defines a configuration structure with embedded defaults
/// in a single declaration.

/// Define a configuration struct with embedded defaults
///
/// Generates:
/// - The struct with public fields
/// - The Default implementation
/// - Serde serialization/deserialization with `#[serde(default)]`
///
/// # Example
/// ```
/// nexa_realtime::config_struct! {
///     pub struct ExampleConfig {
///         retry_attempts: u32 = 3,
///         enabled: bool = true,
///     }
/// }
///
/// assert_eq!(ExampleConfig::default().retry_attempts, 3);
/// ```
#[macro_export]
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_name:ident: $field_type:ty = $default_value:expr
            ),*
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field_name: $field_type,
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field_name: $default_value,
                    )*
                }
            }
        }
    };
}
