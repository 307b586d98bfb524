use std::collections::BTreeSet;

const API_MOD_SOURCE: &str = include_str!("../src/api/mod.rs");
const CONVERSATIONS_SOURCE: &str = include_str!("../src/api/conversations.rs");
const MESSAGES_SOURCE: &str = include_str!("../src/api/messages.rs");

#[test]
fn rest_contract_declares_chat_endpoint_matrix() {
    let expected_paths = [
        "/v1/conversations",
        "/v1/conversations/messages",
        "/v1/conversations/between/{user_id}/{other_user_id}",
        "/v1/conversations/{conversation_id}",
        "/v1/conversations/{conversation_id}/messages",
        "/v1/conversations/{conversation_id}/read",
        "/v1/users/{user_id}/conversations",
        "/v1/users/{user_id}/support-thread",
        "/v1/users/{user_id}/conversations/{target_user_id}",
        "/v1/users/{user_id}/messages",
        "/v1/messages",
        "/v1/messages/{message_id}",
        "/v1/messages/{message_id}/status",
    ];

    let contract_surface = [CONVERSATIONS_SOURCE, MESSAGES_SOURCE].join("\n");

    let mut missing = BTreeSet::new();
    for path in expected_paths {
        if !contract_surface.contains(&format!("\"{path}\"")) {
            missing.insert(path);
        }
    }

    assert!(missing.is_empty(), "missing route declarations for: {missing:?}");
}

#[test]
fn rest_contract_declares_expected_http_method_bindings() {
    let expectations = [
        (CONVERSATIONS_SOURCE, "\"/v1/conversations\"", "post(open_conversation)"),
        (CONVERSATIONS_SOURCE, "\"/v1/conversations/messages\"", "post(send_chat_message)"),
        (
            CONVERSATIONS_SOURCE,
            "\"/v1/conversations/between/{user_id}/{other_user_id}\"",
            "get(conversation_between)",
        ),
        (CONVERSATIONS_SOURCE, "\"/v1/conversations/{conversation_id}\"", "get(get_conversation)"),
        (
            CONVERSATIONS_SOURCE,
            "\"/v1/conversations/{conversation_id}\"",
            "delete(delete_conversation).route_layer(moderate)",
        ),
        (
            CONVERSATIONS_SOURCE,
            "\"/v1/conversations/{conversation_id}/messages\"",
            "get(list_messages)",
        ),
        (CONVERSATIONS_SOURCE, "\"/v1/conversations/{conversation_id}/read\"", "put(mark_read)"),
        (
            CONVERSATIONS_SOURCE,
            "\"/v1/users/{user_id}/conversations\"",
            "get(list_user_conversations)",
        ),
        (CONVERSATIONS_SOURCE, "\"/v1/users/{user_id}/support-thread\"", "get(support_thread)"),
        (
            CONVERSATIONS_SOURCE,
            "\"/v1/users/{user_id}/conversations/{target_user_id}\"",
            "delete(soft_delete_conversation)",
        ),
        (
            CONVERSATIONS_SOURCE,
            "\"/v1/users/{user_id}/messages\"",
            "delete(soft_delete_all_messages)",
        ),
        (MESSAGES_SOURCE, "\"/v1/messages\"", "post(append_message)"),
        (MESSAGES_SOURCE, "\"/v1/messages/{message_id}\"", "get(get_message)"),
        (
            MESSAGES_SOURCE,
            "\"/v1/messages/{message_id}\"",
            "delete(delete_message).route_layer(moderate)",
        ),
        (MESSAGES_SOURCE, "\"/v1/messages/{message_id}/status\"", "put(update_message_status)"),
    ];

    for (source, endpoint, handler) in expectations {
        assert!(source.contains(endpoint), "route {endpoint} must exist");
        assert!(source.contains(handler), "route {endpoint} must bind `{handler}`");
    }
}

#[test]
fn rest_contract_routes_sit_behind_bearer_auth() {
    assert!(API_MOD_SOURCE.contains("require_bearer_auth"));
    for source in [CONVERSATIONS_SOURCE, MESSAGES_SOURCE] {
        assert!(source.contains("Capability::ChatParticipate"));
        assert!(source.contains("Capability::ChatModerate"));
    }
}

#[test]
fn rest_contract_status_conflicts_map_to_409_code() {
    assert!(API_MOD_SOURCE.contains("ErrorCode::InvalidStatusTransition"));
    assert!(API_MOD_SOURCE.contains("StatusError::InvalidTransition"));
}
