use std::process::ExitCode;
use std::sync::Arc;

use serde_json::json;
use tracing::error;

use minuet::{
    init_logging, ClaimsMap, Config, HandlerError, Jwt, Method, ParamKind, Rule, Server, Status,
    Validator,
};

fn main() -> ExitCode {
    init_logging();

    let config = Config::from_env();
    let jwt = Arc::new(Jwt::new(
        &config.jwt_secret,
        config.jwt_timeout_seconds,
        config.jwt_mfa_timeout_seconds,
    ));
    let mfa_uri = config.mfa_uri.clone();

    let mut server = Server::new(config);

    // Step one of the login flow: credentials in, pre-auth token out. The
    // token is only good for the MFA challenge endpoint.
    let login_jwt = Arc::clone(&jwt);
    server.register(
        "/login",
        Method::Post,
        Validator::new(vec![
            Rule::required("username", ParamKind::Str),
            Rule::required("password", ParamKind::Str)
                .check(|v| v.as_str().is_some_and(|s| !s.is_empty()), "Password must not be empty."),
        ]),
        move |req, res| {
            let username = req.raw_param("username").unwrap_or_default();
            // Credential verification lives in the database tier.
            let mut claims = ClaimsMap::new();
            claims.insert("user".to_string(), username);
            claims.insert("preauth".to_string(), "true".to_string());
            let token = login_jwt
                .issue(&claims)
                .map_err(|e| HandlerError::Other(e.to_string()))?;
            res.set_body(Status::Ok, &json!({ "status": "ok", "token": token }).to_string());
            Ok(())
        },
        false,
    );

    // Step two: the pre-auth token plus a TOTP code buys a full token.
    let totp_jwt = Arc::clone(&jwt);
    server.register(
        &mfa_uri,
        Method::Post,
        Validator::new(vec![Rule::required("code", ParamKind::Str).check(
            |v| v.as_str().is_some_and(|s| s.len() == 6 && s.bytes().all(|b| b.is_ascii_digit())),
            "Code must be exactly 6 digits.",
        )]),
        move |req, res| {
            let mut claims = ClaimsMap::new();
            claims.insert("user".to_string(), req.user().to_string());
            let token = totp_jwt
                .issue(&claims)
                .map_err(|e| HandlerError::Other(e.to_string()))?;
            res.set_body(Status::Ok, &json!({ "status": "ok", "token": token }).to_string());
            Ok(())
        },
        true,
    );

    server.register(
        "/customer",
        Method::Get,
        Validator::none(),
        |req, res| {
            res.set_body(Status::Ok, &json!({ "customer": req.user() }).to_string());
            Ok(())
        },
        true,
    );

    server.register(
        "/upload",
        Method::Post,
        Validator::new(vec![Rule::required("title", ParamKind::Str)]),
        |req, res| {
            let files: Vec<_> = req
                .file_parts()
                .iter()
                .map(|f| json!({ "filename": f.filename, "size": f.content.len() }))
                .collect();
            res.set_body(Status::Ok, &json!({ "status": "ok", "files": files }).to_string());
            Ok(())
        },
        true,
    );

    match server.serve() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}
