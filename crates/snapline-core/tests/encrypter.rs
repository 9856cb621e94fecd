#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use snapline_core::crypto::{
    decode_public_key, encrypt_key, generate_key, CryptoError, Encrypter, KeyPair, NONCE_SIZE,
};
use snapline_core::error::SnapError;

#[test]
fn roundtrip_for_every_length() {
    let e = Encrypter::with_key(generate_key());
    for len in 0..300usize {
        let msg: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let ct = e.encrypt(&msg).unwrap();
        assert!(ct.len() >= NONCE_SIZE + len);
        assert_eq!(e.decrypt(&ct).unwrap(), msg);
    }
}

#[test]
fn same_plaintext_differs_each_time() {
    let e = Encrypter::with_key(generate_key());
    let a = e.encrypt(b"metric payload").unwrap();
    let b = e.encrypt(b"metric payload").unwrap();
    assert_ne!(a, b);
    assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
}

#[test]
fn wrong_key_length_fails() {
    for len in [0usize, 16, 31, 33, 64] {
        let e = Encrypter::with_key(vec![7u8; len]);
        assert_eq!(e.encrypt(b"x").unwrap_err(), CryptoError::KeyInvalid);
        assert_eq!(e.decrypt(&[0u8; 40]).unwrap_err(), CryptoError::KeyInvalid);
    }
    assert_eq!(Encrypter::new().encrypt(b"x").unwrap_err(), CryptoError::KeyInvalid);
}

#[test]
fn tampered_or_foreign_ciphertext_rejected() {
    let e = Encrypter::with_key(generate_key());
    let mut ct = e.encrypt(b"hello").unwrap();
    let last = ct.len() - 1;
    ct[last] ^= 0x01;
    assert_eq!(e.decrypt(&ct).unwrap_err(), CryptoError::Authentication);

    let other = Encrypter::with_key(generate_key());
    let ct = e.encrypt(b"hello").unwrap();
    assert_eq!(other.decrypt(&ct).unwrap_err(), CryptoError::Authentication);

    assert_eq!(e.decrypt(&[1, 2, 3]).unwrap_err(), CryptoError::Ciphertext);
}

#[test]
fn key_exchange_installs_key_once() {
    let plugin_side = Encrypter::with_key_pair(KeyPair::generate(1024).unwrap());
    let public_b64 = plugin_side.key_pair().unwrap().public_key_b64().unwrap();

    let key = generate_key();
    let control_side = Encrypter::with_key(key.clone());
    let wrapped = encrypt_key(&decode_public_key(&public_b64).unwrap(), &key).unwrap();

    plugin_side.install_encrypted_key(&wrapped).unwrap();
    let ct = control_side.encrypt(b"ping").unwrap();
    assert_eq!(plugin_side.decrypt(&ct).unwrap(), b"ping");

    assert_eq!(
        plugin_side.install_encrypted_key(&wrapped).unwrap_err(),
        CryptoError::KeyAlreadySet
    );
}

#[test]
fn short_wrapped_key_is_rejected_and_slot_stays_open() {
    let plugin_side = Encrypter::with_key_pair(KeyPair::generate(1024).unwrap());
    let public = decode_public_key(&plugin_side.key_pair().unwrap().public_key_b64().unwrap())
        .unwrap();

    let short = encrypt_key(&public, &[9u8; 16]).unwrap();
    let err: SnapError = plugin_side
        .install_encrypted_key(&short)
        .expect_err("must fail")
        .into();
    assert_eq!(err.code().as_str(), "ENCRYPTION");
    assert!(!plugin_side.has_key());

    let key = generate_key();
    plugin_side
        .install_encrypted_key(&encrypt_key(&public, &key).unwrap())
        .unwrap();
    let ct = Encrypter::with_key(key).encrypt(b"ping").unwrap();
    assert_eq!(plugin_side.decrypt(&ct).unwrap(), b"ping");
}
