diesel::table! {
    source_files (path) {
        path -> Text,
        hash -> Text,
        file_size -> BigInt,
        chunk_count -> Integer,
        archive_path -> Nullable<Text>,
        status -> Text,
        processed_at -> Timestamp,
        is_synced -> Bool,
    }
}

diesel::table! {
    chunks (id) {
        id -> Text,
        source_path -> Text,
        source_hash -> Text,
        chunk_index -> Integer,
        text -> Text,
        content_hash -> Text,
        page_number -> Nullable<Integer>,
        source_location -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    embeddings (chunk_id) {
        chunk_id -> Text,
        embedding -> Binary,
    }
}

diesel::joinable!(chunks -> source_files (source_path));
diesel::joinable!(embeddings -> chunks (chunk_id));

diesel::allow_tables_to_appear_in_same_query!(source_files, chunks, embeddings);
