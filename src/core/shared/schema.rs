diesel::table! {
    users (id) {
        id -> Uuid,
        email -> Varchar,
        name -> Nullable<Varchar>,
        role -> Varchar,
        test_batch_id -> Nullable<Varchar>,
        test_expires_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    tickets (id) {
        id -> Uuid,
        title -> Varchar,
        description -> Nullable<Text>,
        status -> Varchar,
        priority -> Varchar,
        customer_id -> Nullable<Uuid>,
        assignee_id -> Nullable<Uuid>,
        created_by -> Uuid,
        tags -> Array<Text>,
        test_batch_id -> Nullable<Varchar>,
        test_expires_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    messages (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        author_id -> Uuid,
        content -> Text,
        is_internal -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    teams (id) {
        id -> Uuid,
        name -> Varchar,
        tags -> Array<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    team_members (team_id, user_id) {
        team_id -> Uuid,
        user_id -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    audit_logs (id) {
        id -> Uuid,
        action -> Varchar,
        entity_type -> Varchar,
        entity_id -> Uuid,
        actor_id -> Nullable<Uuid>,
        before_state -> Nullable<Jsonb>,
        after_state -> Nullable<Jsonb>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    marketplace_conversations (id) {
        id -> Uuid,
        raw_text -> Text,
        processed -> Nullable<Jsonb>,
        status -> Varchar,
        error -> Nullable<Text>,
        trace_id -> Nullable<Uuid>,
        ticket_id -> Nullable<Uuid>,
        created_by -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(messages -> tickets (ticket_id));
diesel::joinable!(messages -> users (author_id));
diesel::joinable!(team_members -> teams (team_id));
diesel::joinable!(team_members -> users (user_id));
diesel::joinable!(audit_logs -> users (actor_id));
diesel::joinable!(marketplace_conversations -> tickets (ticket_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    tickets,
    messages,
    teams,
    team_members,
    audit_logs,
    marketplace_conversations,
);
