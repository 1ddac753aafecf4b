//! Built-in schema history of the app database.
//!
//! Append only: never edit a published migration, add a new version instead.

use rand::RngCore;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use crate::migrations::{Migration, Step, StepFuture};

/// Display name given to contacts created during back-fill.
pub const DEFAULT_CONTACT_NAME: &str = "New contact";

/// Placeholder routing id for connections that predate routing ids.
pub const EMPTY_ROUTING_ID: &str = "00000000000000000000000000000000";

pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create lines and connections",
        steps: &[
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS lines (
                    lineId          CHAR(32) PRIMARY KEY,
                    name            VARCHAR(64),
                    displayPic      VARCHAR(256),
                    authenticated   BOOL NOT NULL DEFAULT 0,
                    disconnected    BOOL NOT NULL DEFAULT 0,
                    cryptoId        CHAR(32),
                    connectedOn     VARCHAR(27),
                    connectedUsing  VARCHAR(64),
                    permissionsId   CHAR(32),
                    pairHash        CHAR(64)
                )",
            ),
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS connections (
                    chatId            CHAR(32) PRIMARY KEY,
                    connectionType    INTEGER NOT NULL DEFAULT 0,
                    name              VARCHAR(64),
                    text              TEXT,
                    recentMessageType INTEGER,
                    readStatus        INTEGER,
                    timestamp         VARCHAR(27),
                    newMessageCount   INTEGER NOT NULL DEFAULT 0,
                    latestMessageId   CHAR(32),
                    folderId          CHAR(32),
                    pathToDisplayPic  VARCHAR(256)
                )",
            ),
        ],
    },
    Migration {
        version: 2,
        description: "create line messages",
        steps: &[
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS lineMessages (
                    messageId     CHAR(32) NOT NULL,
                    chatId        CHAR(32) NOT NULL,
                    contentType   INTEGER NOT NULL,
                    data          TEXT,
                    replyId       CHAR(32),
                    sender        BOOL NOT NULL,
                    memberId      CHAR(32),
                    timestamp     VARCHAR(27),
                    messageStatus INTEGER,
                    expiresOn     VARCHAR(27),
                    PRIMARY KEY (chatId, messageId)
                )",
            ),
            Step::Sql(
                "CREATE INDEX IF NOT EXISTS idx_line_messages_chat_ts
                    ON lineMessages (chatId, timestamp)",
            ),
        ],
    },
    Migration {
        version: 3,
        description: "create media and folders",
        steps: &[
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS media (
                    mediaId     CHAR(32) PRIMARY KEY,
                    chatId      CHAR(32),
                    messageId   CHAR(32),
                    type        VARCHAR(64),
                    name        VARCHAR(256),
                    filePath    VARCHAR(256),
                    previewPath VARCHAR(256),
                    createdOn   VARCHAR(27)
                )",
            ),
            Step::Sql(
                "CREATE TABLE IF NOT EXISTS folders (
                    folderId      CHAR(32) PRIMARY KEY,
                    name          VARCHAR(64) NOT NULL,
                    permissionsId CHAR(32),
                    unreadCount   INTEGER NOT NULL DEFAULT 0
                )",
            ),
        ],
    },
    Migration {
        version: 4,
        description: "create super ports",
        steps: &[Step::Sql(
            "CREATE TABLE IF NOT EXISTS superPorts (
                portId           CHAR(32) PRIMARY KEY,
                version          VARCHAR(16),
                label            VARCHAR(64),
                usedOnTimestamp  VARCHAR(27),
                createdOnTimestamp VARCHAR(27),
                folderId         CHAR(32),
                permissionsId    CHAR(32),
                connectionsLimit INTEGER NOT NULL DEFAULT 50,
                connectionsMade  INTEGER NOT NULL DEFAULT 0,
                paused           BOOL NOT NULL DEFAULT 0
            )",
        )],
    },
    Migration {
        version: 5,
        description: "create contacts",
        steps: &[Step::Sql(
            "CREATE TABLE IF NOT EXISTS contacts (
                pairHash         CHAR(64) PRIMARY KEY,
                name             VARCHAR(64),
                displayPic       VARCHAR(256),
                notes            TEXT,
                connectedOn      VARCHAR(27),
                connectionSource VARCHAR(64)
            )",
        )],
    },
    Migration {
        version: 6,
        description: "add routing id and pair hash to connections",
        steps: &[
            Step::Sql(
                "ALTER TABLE connections
                    ADD COLUMN routingId CHAR(32) NOT NULL DEFAULT '00000000000000000000000000000000'",
            ),
            Step::Sql("ALTER TABLE connections ADD COLUMN pairHash CHAR(64)"),
            Step::Sql(
                "UPDATE connections
                    SET pairHash = (SELECT lines.pairHash FROM lines WHERE lines.lineId = connections.chatId),
                        routingId = connections.chatId
                  WHERE EXISTS (SELECT 1 FROM lines WHERE lines.lineId = connections.chatId)",
            ),
            Step::Procedure(add_pseudo_contacts),
        ],
    },
];

/// Give every connection still lacking a pair hash its own placeholder
/// contact, so each connection points at exactly one contact row.
fn add_pseudo_contacts(conn: &mut SqliteConnection) -> StepFuture<'_> {
    Box::pin(async move {
        let orphans = sqlx::query(
            "SELECT chatId, name, routingId FROM connections WHERE pairHash IS NULL",
        )
        .fetch_all(&mut *conn)
        .await?;

        for row in orphans {
            let chat_id: String = row.try_get("chatId")?;
            let name: Option<String> = row.try_get("name")?;
            let routing_id: String = row.try_get("routingId")?;

            let connected_on: Option<String> =
                sqlx::query_scalar::<_, Option<String>>("SELECT connectedOn FROM lines WHERE lineId = ?")
                    .bind(&routing_id)
                    .fetch_optional(&mut *conn)
                    .await?
                    .flatten();

            let pair_hash = random_pair_hash();
            sqlx::query("INSERT INTO contacts (pairHash, name, connectedOn) VALUES (?, ?, ?)")
                .bind(&pair_hash)
                .bind(name.as_deref().unwrap_or(DEFAULT_CONTACT_NAME))
                .bind(connected_on)
                .execute(&mut *conn)
                .await?;

            sqlx::query("UPDATE connections SET pairHash = ? WHERE chatId = ?")
                .bind(&pair_hash)
                .bind(&chat_id)
                .execute(&mut *conn)
                .await?;

            debug!(chat_id = %chat_id, "created placeholder contact");
        }
        Ok(())
    })
}

/// 32 random bytes, hex encoded.
fn random_pair_hash() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
