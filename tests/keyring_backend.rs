//! Runs in its own process: it replaces the global keyring credential builder.

use pinauth::prelude::*;

#[test]
fn test_keyring_put_fails_when_backend_drops_writes() {
    // Mock credentials live on a single entry and are never visible to a new one.
    keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
    let store = KeyringTokenStore::new("keyring-backend-test");
    let account = AccountId::new("mock");

    let err = store
        .put(&account, &AccessToken::new("lost"))
        .unwrap_err();
    assert!(matches!(err, StorageError::Backend(_)), "unexpected error: {:?}", err);
    assert_eq!(store.get(&account).unwrap(), None);
}
