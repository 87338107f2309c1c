//! List endpoints over the identity store
//!
//! Plain `SELECT ... ORDER BY name` reads with optional integer filter
//! parameters, joined to the referenced namespace, node, and deployment
//! names.

use super::{internal_error, query_id, sql_params, AppState};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct NodeRow {
    pub id: i64,
    pub name: String,
    pub uid: String,
}

#[derive(Debug, Serialize)]
pub struct NamespaceRow {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct DeploymentRow {
    pub id: i64,
    pub name: String,
    pub uid: String,
    pub namespace_id: i64,
    pub namespace: String,
}

#[derive(Debug, Serialize)]
pub struct PodRow {
    pub id: i64,
    pub name: String,
    pub uid: String,
    pub namespace_id: i64,
    pub namespace: String,
    pub node_id: i64,
    pub node: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PvcRow {
    pub id: i64,
    pub name: String,
    pub uid: String,
    pub namespace_id: i64,
    pub namespace: String,
}

pub(super) async fn nodes(State(state): State<Arc<AppState>>) -> Response {
    let result = state
        .identity
        .query("SELECT id, name, uid FROM nodes ORDER BY name", &[], |row| {
            Ok(NodeRow {
                id: row.get(0)?,
                name: row.get(1)?,
                uid: row.get(2)?,
            })
        });
    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e),
    }
}

pub(super) async fn namespaces(State(state): State<Arc<AppState>>) -> Response {
    let result = state
        .identity
        .query("SELECT id, name FROM namespaces ORDER BY name", &[], |row| {
            Ok(NamespaceRow {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        });
    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e),
    }
}

pub(super) async fn deployments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut sql = String::from(
        "SELECT d.id, d.name, d.uid, d.namespace_id, n.name
         FROM deployments d
         JOIN namespaces n ON d.namespace_id = n.id",
    );
    let mut args: Vec<i64> = Vec::new();

    if let Some(id) = query_id(&params, "namespace") {
        sql.push_str(" WHERE d.namespace_id = ?");
        args.push(id);
    }
    sql.push_str(" ORDER BY d.name");

    let result = state.identity.query(&sql, &sql_params(&args), |row| {
        Ok(DeploymentRow {
            id: row.get(0)?,
            name: row.get(1)?,
            uid: row.get(2)?,
            namespace_id: row.get(3)?,
            namespace: row.get(4)?,
        })
    });
    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e),
    }
}

pub(super) async fn pods(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut sql = String::from(
        "SELECT p.id, p.name, p.uid, p.namespace_id, ns.name, p.node_id, n.name,
                p.deployment_id, d.name
         FROM pods p
         JOIN namespaces ns ON p.namespace_id = ns.id
         JOIN nodes n ON p.node_id = n.id
         LEFT JOIN deployments d ON p.deployment_id = d.id
         WHERE 1=1",
    );
    let mut args: Vec<i64> = Vec::new();

    if let Some(id) = query_id(&params, "deployment") {
        sql.push_str(" AND p.deployment_id = ?");
        args.push(id);
    }
    if let Some(id) = query_id(&params, "namespace") {
        sql.push_str(" AND p.namespace_id = ?");
        args.push(id);
    }
    if let Some(id) = query_id(&params, "node") {
        sql.push_str(" AND p.node_id = ?");
        args.push(id);
    }
    sql.push_str(" ORDER BY p.name");

    let result = state.identity.query(&sql, &sql_params(&args), |row| {
        Ok(PodRow {
            id: row.get(0)?,
            name: row.get(1)?,
            uid: row.get(2)?,
            namespace_id: row.get(3)?,
            namespace: row.get(4)?,
            node_id: row.get(5)?,
            node: row.get(6)?,
            deployment_id: row.get(7)?,
            deployment: row.get(8)?,
        })
    });
    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e),
    }
}

pub(super) async fn pvcs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut sql = String::from(
        "SELECT pvc.id, pvc.name, pvc.uid, pvc.namespace_id, n.name
         FROM pvcs pvc
         JOIN namespaces n ON pvc.namespace_id = n.id",
    );
    let mut args: Vec<i64> = Vec::new();

    if let Some(id) = query_id(&params, "namespace") {
        sql.push_str(" WHERE pvc.namespace_id = ?");
        args.push(id);
    }
    sql.push_str(" ORDER BY pvc.name");

    let result = state.identity.query(&sql, &sql_params(&args), |row| {
        Ok(PvcRow {
            id: row.get(0)?,
            name: row.get(1)?,
            uid: row.get(2)?,
            namespace_id: row.get(3)?,
            namespace: row.get(4)?,
        })
    });
    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e),
    }
}
