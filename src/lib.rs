// Service configuration
pub mod config;

// CSRF state tokens and cookie binding
pub mod random;
pub mod csrf;

// Authorization leg
pub mod authorize;

// Identity provider client
pub mod provider;

// Callback leg and token exchange
pub mod callback;

// Credential records and sinks
pub mod credentials;

// HTTP API
pub mod api;
