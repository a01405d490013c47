//! Diesel table definitions for the catalog database.

diesel::table! {
    videos (id) {
        id -> Integer,
        external_id -> Text,
        source_id -> Nullable<Text>,
        title -> Text,
        description -> Nullable<Text>,
        short_description -> Nullable<Text>,
        tags -> Nullable<Text>,
        category_id -> Nullable<Integer>,
        duration_seconds -> Integer,
        published_at -> Text,
        thumbnails -> Text,
        similar_ids -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    sources (id) {
        id -> Integer,
        external_id -> Text,
        channel_id -> Text,
        title -> Text,
        thumbnails -> Text,
        channel_thumbnails -> Text,
        description -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    categories (id) {
        id -> Integer,
        name -> Text,
        slug -> Text,
    }
}

diesel::table! {
    tombstones (external_id) {
        external_id -> Text,
        reason -> Text,
        created_at -> Text,
    }
}

diesel::joinable!(videos -> categories (category_id));

diesel::allow_tables_to_appear_in_same_query!(videos, sources, categories, tombstones);
