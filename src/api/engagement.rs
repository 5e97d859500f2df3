use serde::de::Error as _;
use serde_json::json;

use crate::api::fields::Fields;
use crate::api::types::{LikeResult, ListResponse, Me, SingleResponse, Tweet, User};
use crate::api::{ApiClientError, XApiClient, decode};
use crate::auth::AuthClient;

impl<A: AuthClient> XApiClient<A> {
    /// The user the current credentials act for. Does not move the cursor.
    pub async fn me(&mut self) -> Result<Me, ApiClientError> {
        let url = self.url("/2/users/me");
        let resp: SingleResponse<Me> = decode(self.fetch(&url, &[]).await?)?;
        resp.data
            .ok_or_else(|| ApiClientError::Decode(serde_json::Error::missing_field("data")))
    }

    /// Return the authenticated user's ID, caching after first call.
    pub async fn my_user_id(&mut self) -> Result<String, ApiClientError> {
        if let Some(ref id) = self.user_id {
            return Ok(id.clone());
        }
        let id = self.me().await?.id;
        self.user_id = Some(id.clone());
        Ok(id)
    }

    /// Tweets liked by the authenticated user.
    pub async fn liked_tweets(&mut self, fields: &Fields) -> Result<ListResponse<Tweet>, ApiClientError> {
        let my_id = self.my_user_id().await?;
        let url = self.url(&format!("/2/users/{my_id}/liked_tweets"));
        decode(self.get(&url, fields).await?)
    }

    pub async fn liking_users(
        &mut self,
        tweet_id: &str,
        fields: &Fields,
    ) -> Result<ListResponse<User>, ApiClientError> {
        let url = self.url(&format!("/2/tweets/{tweet_id}/liking_users"));
        decode(self.get(&url, fields).await?)
    }

    pub async fn like(&mut self, tweet_id: &str) -> Result<SingleResponse<LikeResult>, ApiClientError> {
        let my_id = self.my_user_id().await?;
        let url = self.url(&format!("/2/users/{my_id}/likes"));
        decode(self.post(&url, &json!({ "tweet_id": tweet_id })).await?)
    }

    pub async fn unlike(&mut self, tweet_id: &str) -> Result<SingleResponse<LikeResult>, ApiClientError> {
        let my_id = self.my_user_id().await?;
        let url = self.url(&format!("/2/users/{my_id}/likes/{tweet_id}"));
        decode(self.delete(&url).await?)
    }
}
