/*!
# Equipment Desk

Client library and terminal front-end for the equipment inventory service.

## Overview

The inventory service keeps equipment rows imported from spreadsheets and a
comment thread per row. This crate talks to its REST API for everything that
reads or changes data, and listens on its Socket.IO channel for live comment
and comment-count pushes. REST stays the source of truth; pushes only keep an
already loaded view current.

## Architecture

### Context objects
Created once by the binary and handed to the controllers:
- **SessionStore** - Persists the bearer token (`access_token`)
- **ApiClient** - REST calls, bearer header attached when a token is held
- **RealtimeChannel** - One shared socket, per-room joins, disposable handlers

### Controllers
- **EquipmentListController** - Filters and pagination; stale pages are discarded
- **CommentThread** - History plus live comments of the open equipment row

### Front-end
- **Authenticator** - Login, registration and logout with local validation
- **SpreadsheetTransfer** - Workbook import, export and template download
- **view** - Text rendering of the table and the comment panel

## Modules

- **config**: Endpoints and session file location
- **error**: `ClientError` and `ValidationError`
- **models**: Wire types of the REST API
- **validation**: Form checks run before any request
- **session**: Token persistence
- **api**: REST client
- **realtime**: Socket.IO connection, event codec and subscriptions
- **equipment**: Equipment list controller and filter state
- **comments**: Comment thread controller
- **auth**: Auth flows
- **transfer**: Spreadsheet import/export
- **view**: Table and thread rendering
*/

pub mod api;
pub mod auth;
pub mod comments;
pub mod config;
pub mod equipment;
pub mod error;
pub mod models;
pub mod realtime;
pub mod session;
pub mod transfer;
pub mod validation;
pub mod view;

pub use api::ApiClient;
pub use auth::Authenticator;
pub use comments::{CommentThread, ThreadPhase, ThreadSnapshot};
pub use config::ClientConfig;
pub use equipment::{
    CommentCountBucket, EquipmentListController, FetchOutcome, FilterState, ListPhase,
    ListSnapshot,
};
pub use error::{ClientError, Result, ValidationError};
pub use models::*;
pub use realtime::{RealtimeChannel, RoomMembership, Subscription, Topic};
pub use session::SessionStore;
pub use transfer::SpreadsheetTransfer;
