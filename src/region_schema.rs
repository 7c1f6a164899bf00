// Region shard tables; resolved against the shard's schema via
// search_path, so no schema qualification here.

diesel::table! {
    #[sql_name = "schema_migrations"]
    region_schema_migrations (version) {
        version -> Int4,
        applied_at -> Timestamptz,
    }
}

diesel::table! {
    region_meta (region) {
        region -> Text,
        applied_versions -> Jsonb,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    sectors (sector_index) {
        sector_index -> Int4,
        sector_type -> Text,
        district -> Nullable<Text>,
        data -> Jsonb,
        version -> Int4,
    }
}

diesel::table! {
    warp_links (from_sector, to_sector) {
        from_sector -> Int4,
        to_sector -> Int4,
        data -> Jsonb,
    }
}

diesel::table! {
    planets (id) {
        id -> Uuid,
        sector_index -> Int4,
        owner -> Nullable<Uuid>,
        data -> Jsonb,
        version -> Int4,
    }
}

diesel::table! {
    stations (id) {
        id -> Uuid,
        sector_index -> Int4,
        data -> Jsonb,
        version -> Int4,
    }
}

diesel::table! {
    ships (id) {
        id -> Uuid,
        pilot -> Uuid,
        sector_index -> Int4,
        reserved -> Bool,
        data -> Jsonb,
        version -> Int4,
    }
}

diesel::table! {
    drones (id) {
        id -> Uuid,
        owner -> Uuid,
        data -> Jsonb,
        version -> Int4,
    }
}

diesel::table! {
    drone_deployments (id) {
        id -> Uuid,
        owner -> Uuid,
        data -> Jsonb,
        version -> Int4,
    }
}

diesel::table! {
    combats (id) {
        id -> Uuid,
        sector_index -> Int4,
        state -> Text,
        data -> Jsonb,
        version -> Int4,
    }
}

diesel::table! {
    messages (id) {
        id -> Uuid,
        author -> Uuid,
        data -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    message_recipients (message_id, recipient) {
        message_id -> Uuid,
        recipient -> Uuid,
        read_at -> Nullable<Timestamptz>,
        confirmed_at -> Nullable<Timestamptz>,
        deleted -> Bool,
    }
}

diesel::table! {
    teams (id) {
        id -> Uuid,
        name -> Text,
        data -> Jsonb,
        version -> Int4,
    }
}

diesel::table! {
    policies (id) {
        id -> Uuid,
        status -> Text,
        closes_at -> Timestamptz,
        data -> Jsonb,
        version -> Int4,
    }
}

diesel::table! {
    policy_votes (policy_id, voter) {
        policy_id -> Uuid,
        voter -> Uuid,
        in_favor -> Bool,
        weight -> Float8,
        cast_at -> Timestamptz,
    }
}

diesel::table! {
    elections (id) {
        id -> Uuid,
        status -> Text,
        closes_at -> Timestamptz,
        data -> Jsonb,
        version -> Int4,
    }
}

diesel::table! {
    votes (election_id, voter) {
        election_id -> Uuid,
        voter -> Uuid,
        data -> Jsonb,
    }
}

diesel::table! {
    contracts (id) {
        id -> Uuid,
        poster -> Uuid,
        assignee -> Nullable<Uuid>,
        commodity -> Text,
        units -> Int8,
        station -> Uuid,
        reward -> Int8,
        status -> Text,
        data -> Jsonb,
        version -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    first_login_sessions (id) {
        id -> Uuid,
        player -> Uuid,
        state -> Text,
        data -> Jsonb,
        version -> Int4,
    }
}

diesel::table! {
    scheduler_lease (name) {
        name -> Text,
        holder -> Text,
        expires_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    region_meta,
    sectors,
    warp_links,
    planets,
    stations,
    ships,
    drones,
    drone_deployments,
    combats,
    messages,
    message_recipients,
    teams,
    policies,
    policy_votes,
    elections,
    votes,
    contracts,
    first_login_sessions,
    scheduler_lease,
);
