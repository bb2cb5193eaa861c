use super::*;
use jsonwebtoken::{EncodingKey, Header, encode};

const SECRET: &str = "supersecretjwtsecretforunittesting123";

fn token_for(claims: &AccessClaims, secret: &str) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[test]
fn accepts_a_valid_token() {
    let claims = AccessClaims {
        sub: "123e4567-e89b-12d3-a456-426614174000".to_string(),
        email: Some("test@example.com".to_string()),
        exp: 9999999999,
    };

    let token = token_for(&claims, SECRET);
    let validated = validate_access_token(&token, SECRET).expect("valid token should pass");

    assert_eq!(validated.sub, claims.sub);
    assert_eq!(validated.email, claims.email);
}

#[test]
fn rejects_an_expired_token() {
    let claims = AccessClaims {
        sub: "123e4567-e89b-12d3-a456-426614174000".to_string(),
        email: None,
        exp: 1,
    };

    let token = token_for(&claims, SECRET);
    assert!(validate_access_token(&token, SECRET).is_err());
}

#[test]
fn rejects_a_token_signed_with_another_secret() {
    let claims = AccessClaims {
        sub: "123e4567-e89b-12d3-a456-426614174000".to_string(),
        email: None,
        exp: 9999999999,
    };

    let token = token_for(&claims, "wrongsecret");
    assert!(validate_access_token(&token, SECRET).is_err());
}
