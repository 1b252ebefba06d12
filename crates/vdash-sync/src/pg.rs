use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use vdash_core::CampaignRef;

use crate::store::{
    AgentCampaignPage, AgentListing, AgentRow, AgentStore, CampaignRow, PageRequest, Pagination,
    StoreError,
};

#[derive(Debug, Clone)]
pub struct PgAgentStore {
    pool: PgPool,
}

impl PgAgentStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn agent_from_row(row: &PgRow) -> Result<AgentRow, sqlx::Error> {
    Ok(AgentRow {
        id: row.try_get("id")?,
        agent_user: row.try_get("agent_user")?,
        full_name: row.try_get("full_name")?,
        user_group: row.try_get("user_group")?,
    })
}

fn campaign_from_row(row: &PgRow) -> Result<CampaignRow, sqlx::Error> {
    Ok(CampaignRow {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        campaign_name: row.try_get("campaign_name")?,
    })
}

fn campaign_ref_from_row(row: &PgRow) -> Result<CampaignRef, sqlx::Error> {
    let id: String = row.try_get("campaign_id")?;
    let name: Option<String> = row.try_get("campaign_name")?;
    Ok(CampaignRef::new(id.clone(), name.unwrap_or(id)))
}

#[async_trait]
impl AgentStore for PgAgentStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_agent(&self, agent_user: &str) -> Result<Option<AgentRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, agent_user, full_name, user_group
              FROM agents
             WHERE agent_user = $1
            "#,
        )
        .bind(agent_user)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(agent_from_row).transpose()?)
    }

    async fn create_agent(
        &self,
        agent_user: &str,
        full_name: Option<&str>,
        user_group: Option<&str>,
    ) -> Result<AgentRow, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO agents (agent_user, full_name, user_group)
            VALUES ($1, $2, $3)
            RETURNING id, agent_user, full_name, user_group
            "#,
        )
        .bind(agent_user)
        .bind(full_name)
        .bind(user_group)
        .fetch_one(&self.pool)
        .await?;
        Ok(agent_from_row(&row)?)
    }

    async fn update_agent(
        &self,
        id: i64,
        full_name: Option<&str>,
        user_group: Option<&str>,
    ) -> Result<AgentRow, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE agents
               SET full_name = $2,
                   user_group = $3,
                   updated_at = NOW()
             WHERE id = $1
            RETURNING id, agent_user, full_name, user_group
            "#,
        )
        .bind(id)
        .bind(full_name)
        .bind(user_group)
        .fetch_one(&self.pool)
        .await?;
        Ok(agent_from_row(&row)?)
    }

    async fn find_campaign(&self, campaign_id: &str) -> Result<Option<CampaignRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, campaign_id, campaign_name
              FROM campaigns
             WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(campaign_from_row).transpose()?)
    }

    async fn create_campaign(&self, campaign_id: &str, name: &str) -> Result<CampaignRow, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO campaigns (campaign_id, campaign_name)
            VALUES ($1, $2)
            RETURNING id, campaign_id, campaign_name
            "#,
        )
        .bind(campaign_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(campaign_from_row(&row)?)
    }

    async fn update_campaign(&self, id: i64, name: &str) -> Result<CampaignRow, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE campaigns
               SET campaign_name = $2,
                   updated_at = NOW()
             WHERE id = $1
            RETURNING id, campaign_id, campaign_name
            "#,
        )
        .bind(id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(campaign_from_row(&row)?)
    }

    async fn linked_campaign_ids(&self, agent_id: i64) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT c.campaign_id
              FROM agent_campaigns ac
              JOIN campaigns c ON c.id = ac.campaign_id
             WHERE ac.agent_id = $1
             ORDER BY c.campaign_id
            "#,
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.try_get("campaign_id")?);
        }
        Ok(out)
    }

    async fn link(&self, agent_id: i64, campaign_row_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO agent_campaigns (agent_id, campaign_id)
            VALUES ($1, $2)
            ON CONFLICT (agent_id, campaign_id) DO NOTHING
            "#,
        )
        .bind(agent_id)
        .bind(campaign_row_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn unlink(&self, agent_id: i64, campaign_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM agent_campaigns ac
             USING campaigns c
             WHERE ac.campaign_id = c.id
               AND ac.agent_id = $1
               AND c.campaign_id = $2
            "#,
        )
        .bind(agent_id)
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn agents_page(
        &self,
        page: PageRequest,
        search: Option<&str>,
    ) -> Result<(Vec<AgentListing>, u64), StoreError> {
        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
              FROM agents
             WHERE $1::text IS NULL
                OR strpos(agent_user, $1) > 0
                OR strpos(COALESCE(full_name, ''), $1) > 0
            "#,
        )
        .bind(search)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;

        let rows = sqlx::query(
            r#"
            SELECT id, agent_user, full_name, user_group
              FROM agents
             WHERE $1::text IS NULL
                OR strpos(agent_user, $1) > 0
                OR strpos(COALESCE(full_name, ''), $1) > 0
             ORDER BY agent_user
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(search)
        .bind(i64::from(page.per_page))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        let agents = rows.iter().map(agent_from_row).collect::<Result<Vec<_>, _>>()?;

        let ids: Vec<i64> = agents.iter().map(|a| a.id).collect();
        let link_rows = sqlx::query(
            r#"
            SELECT ac.agent_id, c.campaign_id, c.campaign_name
              FROM agent_campaigns ac
              JOIN campaigns c ON c.id = ac.campaign_id
             WHERE ac.agent_id = ANY($1)
             ORDER BY c.campaign_name, c.campaign_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let mut by_agent: HashMap<i64, Vec<CampaignRef>> = HashMap::new();
        for row in &link_rows {
            let agent_id: i64 = row.try_get("agent_id")?;
            by_agent.entry(agent_id).or_default().push(campaign_ref_from_row(row)?);
        }

        let data = agents
            .into_iter()
            .map(|a| AgentListing {
                campaigns: by_agent.remove(&a.id).unwrap_or_default(),
                user: a.agent_user,
                full_name: a.full_name,
                user_group: a.user_group,
            })
            .collect();
        Ok((data, total.max(0) as u64))
    }

    async fn agent_campaigns_page(
        &self,
        agent_user: &str,
        page: PageRequest,
    ) -> Result<Option<AgentCampaignPage>, StoreError> {
        let Some(agent) = self.find_agent(agent_user).await? else {
            return Ok(None);
        };

        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM agent_campaigns WHERE agent_id = $1")
            .bind(agent.id)
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        let rows = sqlx::query(
            r#"
            SELECT c.campaign_id, c.campaign_name
              FROM agent_campaigns ac
              JOIN campaigns c ON c.id = ac.campaign_id
             WHERE ac.agent_id = $1
             ORDER BY c.campaign_name, c.campaign_id
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(agent.id)
        .bind(i64::from(page.per_page))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        let campaigns = rows.iter().map(campaign_ref_from_row).collect::<Result<Vec<_>, _>>()?;

        Ok(Some(AgentCampaignPage {
            agent_user: agent.agent_user,
            agent_name: agent.full_name,
            user_group: agent.user_group,
            campaigns,
            pagination: Pagination::new(page, total.max(0) as u64),
        }))
    }
}
