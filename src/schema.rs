// Global shard tables.

diesel::table! {
    schema_migrations (version) {
        version -> Int4,
        applied_at -> Timestamptz,
    }
}

diesel::table! {
    accounts (id) {
        id -> Uuid,
        handle -> Text,
        email -> Text,
        credential_hash -> Text,
        role -> Text,
        mfa_enabled -> Bool,
        mfa_secret -> Nullable<Text>,
        backup_codes -> Jsonb,
        oauth_bindings -> Jsonb,
        disabled -> Bool,
        deleted_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    refresh_tokens (id) {
        id -> Uuid,
        account_id -> Uuid,
        family -> Uuid,
        token_hash -> Text,
        device_fingerprint -> Text,
        expires_at -> Timestamptz,
        used -> Bool,
        revoked -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    players (id) {
        id -> Uuid,
        account_id -> Uuid,
        callsign -> Text,
        data -> Jsonb,
        version -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    regions (name) {
        name -> Text,
        status -> Text,
        data -> Jsonb,
        version -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    memberships (player_id, region) {
        player_id -> Uuid,
        region -> Text,
        data -> Jsonb,
        version -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    treaties (id) {
        id -> Uuid,
        region_a -> Text,
        region_b -> Text,
        status -> Text,
        data -> Jsonb,
        version -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    travels (id) {
        id -> Uuid,
        player_id -> Uuid,
        source -> Text,
        destination -> Text,
        state -> Text,
        data -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    audit_log (id) {
        id -> Int8,
        account_id -> Nullable<Uuid>,
        action -> Text,
        detail -> Jsonb,
        request_id -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    webhook_deliveries (delivery_id) {
        delivery_id -> Text,
        event_type -> Text,
        received_at -> Timestamptz,
    }
}

diesel::table! {
    durable_events (seq) {
        seq -> Int8,
        scope -> Text,
        event_type -> Text,
        payload -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    generic_lookup (key) {
        key -> Text,
        value -> Jsonb,
        inserted_at -> Timestamptz,
    }
}

diesel::table! {
    bounties (id) {
        id -> Uuid,
        region -> Text,
        target -> Uuid,
        poster -> Uuid,
        amount -> Int8,
        status -> Text,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    schema_migrations,
    accounts,
    refresh_tokens,
    players,
    regions,
    memberships,
    treaties,
    travels,
    audit_log,
    webhook_deliveries,
    durable_events,
    generic_lookup,
    bounties,
);
